use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{DiscountFailurePolicy, FeeConfig};
use crate::context::ExecutionContext;
use crate::decimal::Money;
use crate::discounts::{apply_discount, AppliedDiscount, DiscountLookup, DiscountResolver};
use crate::errors::{FeeError, Result};
use crate::events::{Event, EventStore};
use crate::store::FeeBackend;
use crate::types::{BatchId, CourseId, StudentId};

use super::{FeeAllocation, FeeStructure, NewFeeAllocation, NewFeeStructure, StudentFeeRecord};

/// what the operator asked to bill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub batch_id: Option<BatchId>,
    pub expected_base_amount: Money,
    /// display name for a newly created fee structure
    pub structure_name: Option<String>,
}

/// conditions the operator should see before confirming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeeWarning {
    DiscountLookupFailed { student_id: StudentId, reason: String },
}

/// a fee structure + allocation that does not exist yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationProposal {
    pub request: AllocationRequest,
    pub discount: DiscountLookup,
    pub applied: AppliedDiscount,
    pub total_surcharge: Money,
    pub payable_amount: Money,
    pub warnings: Vec<FeeWarning>,
}

impl AllocationProposal {
    fn structure_payload(&self, currency: &str) -> NewFeeStructure {
        let name = self
            .request
            .structure_name
            .clone()
            .unwrap_or_else(|| format!("Course fee {}", self.request.expected_base_amount));
        NewFeeStructure {
            name,
            course_id: self.request.course_id,
            batch_id: self.request.batch_id,
            total_amount: self.request.expected_base_amount,
            currency: currency.to_string(),
            is_active: true,
        }
    }

    fn allocation_payload(&self, structure: &FeeStructure) -> NewFeeAllocation {
        NewFeeAllocation {
            student_id: self.request.student_id,
            fee_structure_id: structure.id,
            original_amount: self.request.expected_base_amount,
            payable_amount: self.payable_amount,
            total_discount: self.applied.discount,
            total_surcharge: self.total_surcharge,
        }
    }
}

/// result of looking up a student's fee for an expected amount
#[derive(Debug, Clone, PartialEq)]
pub enum AllocationPlan {
    /// the backend already holds an allocation for this amount
    Matched(StudentFeeRecord),
    /// nothing matched; creating one needs operator confirmation
    NeedsConfirmation(AllocationProposal),
}

/// operator confirmation for writing a new allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    /// confirmed with every proposal warning acknowledged
    ConfirmedWithWarnings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedAllocation {
    pub structure: FeeStructure,
    pub allocation: FeeAllocation,
    pub record: StudentFeeRecord,
    pub warnings: Vec<FeeWarning>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Existing(StudentFeeRecord),
    Created(CreatedAllocation),
}

impl Resolution {
    pub fn record(&self) -> &StudentFeeRecord {
        match self {
            Resolution::Existing(record) => record,
            Resolution::Created(created) => &created.record,
        }
    }
}

/// finds or creates the authoritative allocation for a student
pub struct AllocationResolver<'a> {
    config: &'a FeeConfig,
}

impl<'a> AllocationResolver<'a> {
    pub fn new(config: &'a FeeConfig) -> Self {
        Self { config }
    }

    /// closest record within tolerance of `expected`, if any
    pub fn find_match<'r>(
        &self,
        records: &'r [StudentFeeRecord],
        expected: Money,
    ) -> Option<&'r StudentFeeRecord> {
        let tolerance = self.config.tolerance.allocation_match;
        records
            .iter()
            .filter(|record| record.matches_amount(expected, tolerance))
            .min_by_key(|record| {
                record
                    .payable_amount
                    .distance(expected)
                    .min(record.total_amount.distance(expected))
            })
    }

    /// look up without writing anything
    pub fn plan<B: FeeBackend>(
        &self,
        backend: &B,
        ctx: &ExecutionContext,
        request: AllocationRequest,
        events: &mut EventStore,
    ) -> Result<AllocationPlan> {
        if request.expected_base_amount.is_negative() {
            return Err(FeeError::InvalidAmount {
                amount: request.expected_base_amount,
            });
        }

        let records = backend
            .get_fee_allocations_for_student(ctx, request.student_id)
            .map_err(|err| FeeError::remote("fetch fee allocations", err))?;

        if let Some(record) = self.find_match(&records, request.expected_base_amount) {
            info!(
                student_id = %request.student_id,
                allocation_id = %record.id,
                expected = %request.expected_base_amount,
                payable = %record.payable_amount,
                "matched existing fee allocation"
            );
            events.emit(Event::AllocationMatched {
                student_id: request.student_id,
                allocation_id: record.id,
                expected_amount: request.expected_base_amount,
                payable_amount: record.payable_amount,
                operator: ctx.operator_id(),
                timestamp: ctx.now(),
            });
            return Ok(AllocationPlan::Matched(record.clone()));
        }

        let proposal = self.propose(backend, ctx, request, events)?;
        Ok(AllocationPlan::NeedsConfirmation(proposal))
    }

    fn propose<B: FeeBackend>(
        &self,
        backend: &B,
        ctx: &ExecutionContext,
        request: AllocationRequest,
        events: &mut EventStore,
    ) -> Result<AllocationProposal> {
        let discount =
            DiscountResolver::resolve(backend, ctx, request.student_id, request.batch_id)?;

        let mut warnings = Vec::new();
        if let DiscountLookup::Degraded { reason } = &discount {
            events.emit(Event::DiscountLookupDegraded {
                student_id: request.student_id,
                reason: reason.clone(),
                operator: ctx.operator_id(),
                timestamp: ctx.now(),
            });
            warnings.push(FeeWarning::DiscountLookupFailed {
                student_id: request.student_id,
                reason: reason.clone(),
            });
        }

        let applied = apply_discount(request.expected_base_amount, discount.rule());
        let total_surcharge = applied.payable.portion(self.config.surcharge_rate);
        let payable_amount = applied.payable + total_surcharge;

        Ok(AllocationProposal {
            request,
            discount,
            applied,
            total_surcharge,
            payable_amount,
            warnings,
        })
    }

    /// write the proposed structure and allocation to the backend
    pub fn create<B: FeeBackend>(
        &self,
        backend: &mut B,
        ctx: &ExecutionContext,
        proposal: &AllocationProposal,
        confirmation: Confirmation,
        events: &mut EventStore,
    ) -> Result<CreatedAllocation> {
        let student_id = proposal.request.student_id;
        if !proposal.warnings.is_empty()
            && self.config.discount_failure_policy == DiscountFailurePolicy::RequireAcknowledgement
            && confirmation != Confirmation::ConfirmedWithWarnings
        {
            return Err(FeeError::UnacknowledgedWarning { student_id });
        }

        let structure = backend
            .create_fee_structure(ctx, &proposal.structure_payload(&self.config.currency))
            .map_err(|err| FeeError::remote("create fee structure", err))?;
        events.emit(Event::FeeStructureCreated {
            structure_id: structure.id,
            course_id: structure.course_id,
            total_amount: structure.total_amount,
            operator: ctx.operator_id(),
            timestamp: ctx.now(),
        });

        let allocation = match backend.create_fee_allocation(ctx, &proposal.allocation_payload(&structure)) {
            Ok(allocation) => allocation,
            Err(err) => {
                warn!(
                    %student_id,
                    structure_id = %structure.id,
                    error = %err,
                    "fee structure created but allocation failed"
                );
                return Err(FeeError::PartialProgress {
                    step: "create fee allocation".to_string(),
                    completed: vec![format!(
                        "fee structure {} for {}",
                        structure.id, structure.total_amount
                    )],
                    source: Box::new(FeeError::remote("create fee allocation", err)),
                });
            }
        };

        info!(
            %student_id,
            allocation_id = %allocation.id,
            original = %allocation.original_amount,
            discount = %allocation.total_discount,
            payable = %allocation.payable_amount,
            "created fee allocation"
        );
        events.emit(Event::AllocationCreated {
            allocation_id: allocation.id,
            student_id,
            original_amount: allocation.original_amount,
            total_discount: allocation.total_discount,
            total_surcharge: allocation.total_surcharge,
            payable_amount: allocation.payable_amount,
            discount_rule: proposal.applied.rule_id,
            operator: ctx.operator_id(),
            timestamp: ctx.now(),
        });

        Ok(CreatedAllocation {
            record: StudentFeeRecord::from_allocation(&allocation),
            structure,
            allocation,
            warnings: proposal.warnings.clone(),
        })
    }

    /// match an existing allocation or, when confirmed, create a new one
    pub fn resolve_or_create<B: FeeBackend>(
        &self,
        backend: &mut B,
        ctx: &ExecutionContext,
        request: AllocationRequest,
        confirmation: Option<Confirmation>,
        events: &mut EventStore,
    ) -> Result<Resolution> {
        match self.plan(backend, ctx, request, events)? {
            AllocationPlan::Matched(record) => Ok(Resolution::Existing(record)),
            AllocationPlan::NeedsConfirmation(proposal) => {
                let Some(confirmation) = confirmation else {
                    return Err(FeeError::ConfirmationRequired {
                        student_id: proposal.request.student_id,
                        expected_amount: proposal.request.expected_base_amount,
                    });
                };
                let created = self.create(backend, ctx, &proposal, confirmation, events)?;
                Ok(Resolution::Created(created))
            }
        }
    }
}
