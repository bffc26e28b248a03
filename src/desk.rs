use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::allocation::{
    AllocationPlan, AllocationProposal, AllocationRequest, AllocationResolver, Confirmation,
    CreatedAllocation, Resolution, StudentFeeRecord,
};
use crate::config::FeeConfig;
use crate::context::ExecutionContext;
use crate::decimal::Money;
use crate::discounts::{DiscountRule, NewDiscountRule};
use crate::enrollment::Enrollment;
use crate::errors::{FeeError, Result};
use crate::events::{Event, EventStore};
use crate::payments::{
    generate_reference, AllocationBalance, InstallmentPlan, PaymentInput, PaymentKind,
    PaymentRecord, RefundOutcome, RefundPlanner, ScheduleDraft,
};
use crate::store::{
    CatalogEntry, DualSource, FallbackCache, FeeBackend, LocalCache, Origin, Persisted,
    WritePolicy,
};
use crate::types::{
    AllocationId, AllocationStatus, BatchId, CourseId, DiscountId, DiscountScope, PaymentId,
    PlanType, StudentId,
};
use crate::views::{AllocationStatement, PlanSource};

/// a recorded payment and the allocation balance right after it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment: Persisted<PaymentRecord>,
    pub paid_after: Money,
    pub pending_after: Money,
    pub status_after: AllocationStatus,
}

/// enroll a student and settle their fee in one pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionRequest {
    pub course_id: CourseId,
    pub batch_id: BatchId,
    pub student_id: StudentId,
    /// looked up from the catalog when absent
    pub expected_base_amount: Option<Money>,
    pub structure_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AllocationStep {
    Planned(AllocationPlan),
    /// the backend could not be reached; retry the allocation later
    Deferred { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub enrollment: Persisted<Enrollment>,
    pub allocation: AllocationStep,
}

/// operator-facing fee desk
///
/// Wires the backend, the fallback cache and the resolvers together. Every operation takes the
/// caller's execution context and appends to `events`.
pub struct FeeDesk<B: FeeBackend, C: FallbackCache = LocalCache> {
    backend: B,
    store: DualSource<C>,
    config: FeeConfig,
    pub events: EventStore,
}

impl<B: FeeBackend> FeeDesk<B, LocalCache> {
    /// desk with the fallback cache selected by `config`
    pub fn from_config(backend: B, config: FeeConfig) -> Result<Self> {
        let cache = LocalCache::from_config(&config.fallback)?;
        Self::new(backend, cache, config)
    }
}

impl<B: FeeBackend, C: FallbackCache> FeeDesk<B, C> {
    pub fn new(backend: B, cache: C, config: FeeConfig) -> Result<Self> {
        config.validate()?;
        let fallback_enabled = config.fallback.enabled;
        Ok(Self {
            backend,
            store: DualSource::new(cache, fallback_enabled),
            config,
            events: EventStore::new(),
        })
    }

    pub fn config(&self) -> &FeeConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn store(&self) -> &DualSource<C> {
        &self.store
    }

    // catalog

    /// batch amount when the batch carries one, otherwise the course amount
    pub fn base_fee(
        &self,
        ctx: &ExecutionContext,
        course_id: CourseId,
        batch_id: Option<BatchId>,
    ) -> Result<Money> {
        if let Some(batch_id) = batch_id {
            let batches = self
                .backend
                .get_batches_by_course(ctx, course_id)
                .map_err(|err| FeeError::remote("fetch batches", err))?;
            if let Some(amount) = batches.iter().find(|b| b.id == batch_id).and_then(|b| b.amount) {
                return Ok(amount);
            }
        }

        let courses = self
            .backend
            .get_courses(ctx)
            .map_err(|err| FeeError::remote("fetch courses", err))?;
        courses
            .iter()
            .find(|c| c.id == course_id)
            .and_then(|c| c.amount)
            .ok_or(FeeError::BaseFeeUnavailable { course_id })
    }

    pub fn roster(&self, ctx: &ExecutionContext, batch_id: BatchId) -> Result<Vec<CatalogEntry>> {
        self.backend
            .get_students_by_batch(ctx, batch_id)
            .map_err(|err| FeeError::remote("fetch batch students", err))
    }

    // enrollment

    /// idempotent on (batch, student) both remotely and in the fallback cache
    pub fn enroll_student(
        &mut self,
        ctx: &ExecutionContext,
        batch_id: BatchId,
        student_id: StudentId,
    ) -> Result<Persisted<Enrollment>> {
        // an unsynced enrollment is resent as-is so repeated calls keep one record
        let enrollment = match self.store.find::<Enrollment>(&(batch_id, student_id))? {
            Some(cached) if cached.is_active() => cached,
            _ => Enrollment::new(batch_id, student_id, ctx.now()),
        };
        let backend = &mut self.backend;
        let saved = self.store.write(
            "enroll",
            WritePolicy::FallbackOnTransport,
            enrollment,
            |payload| backend.enroll(ctx, payload),
        )?;

        info!(%batch_id, %student_id, origin = ?saved.origin, "student enrolled");
        self.events.emit(Event::Enrolled {
            batch_id,
            student_id,
            origin: saved.origin,
            operator: ctx.operator_id(),
            timestamp: ctx.now(),
        });
        Ok(saved)
    }

    /// withdraw a student; offline this writes a withdrawn record under the same key
    pub fn unenroll_student(
        &mut self,
        ctx: &ExecutionContext,
        batch_id: BatchId,
        student_id: StudentId,
    ) -> Result<Origin> {
        let tombstone = match self.store.find::<Enrollment>(&(batch_id, student_id))? {
            Some(existing) => existing.withdrawn(),
            None => Enrollment::new(batch_id, student_id, ctx.now()).withdrawn(),
        };
        let backend = &mut self.backend;
        let saved = self.store.write(
            "unenroll",
            WritePolicy::FallbackOnTransport,
            tombstone,
            |payload| {
                backend
                    .unenroll(ctx, batch_id, student_id)
                    .map(|()| payload.clone())
            },
        )?;

        info!(%batch_id, %student_id, origin = ?saved.origin, "student withdrawn");
        self.events.emit(Event::Unenrolled {
            batch_id,
            student_id,
            origin: saved.origin,
            operator: ctx.operator_id(),
            timestamp: ctx.now(),
        });
        Ok(saved.origin)
    }

    /// active enrollments of a batch, remote and fallback merged
    pub fn enrollments(
        &self,
        ctx: &ExecutionContext,
        batch_id: BatchId,
    ) -> Result<Vec<Persisted<Enrollment>>> {
        let merged = self.store.merge(
            "list enrollments",
            self.backend.get_enrollments(ctx, batch_id),
            |e: &Enrollment| e.batch_id == batch_id,
        )?;
        Ok(merged.into_iter().filter(|e| e.record.is_active()).collect())
    }

    // allocation

    pub fn plan_allocation(
        &mut self,
        ctx: &ExecutionContext,
        request: AllocationRequest,
    ) -> Result<AllocationPlan> {
        AllocationResolver::new(&self.config).plan(&self.backend, ctx, request, &mut self.events)
    }

    /// write a confirmed proposal; parked copies of the same fee are dropped on success
    pub fn confirm_allocation(
        &mut self,
        ctx: &ExecutionContext,
        proposal: &AllocationProposal,
        confirmation: Confirmation,
    ) -> Result<CreatedAllocation> {
        let created = AllocationResolver::new(&self.config).create(
            &mut self.backend,
            ctx,
            proposal,
            confirmation,
            &mut self.events,
        )?;
        self.drop_parked(proposal)?;
        Ok(created)
    }

    pub fn resolve_or_create(
        &mut self,
        ctx: &ExecutionContext,
        request: AllocationRequest,
        confirmation: Option<Confirmation>,
    ) -> Result<Resolution> {
        AllocationResolver::new(&self.config).resolve_or_create(
            &mut self.backend,
            ctx,
            request,
            confirmation,
            &mut self.events,
        )
    }

    /// keep a proposal locally after the backend could not take it
    pub fn park_allocation(
        &mut self,
        ctx: &ExecutionContext,
        proposal: &AllocationProposal,
    ) -> Result<Persisted<StudentFeeRecord>> {
        if !self.config.fallback.enabled {
            return Err(FeeError::Cache {
                message: "fallback cache is disabled".to_string(),
            });
        }
        let record = StudentFeeRecord {
            id: Uuid::new_v4(),
            student_id: proposal.request.student_id,
            fee_structure_id: Uuid::nil(),
            total_amount: proposal.request.expected_base_amount,
            payable_amount: proposal.payable_amount,
            total_discount: proposal.applied.discount,
            total_surcharge: proposal.total_surcharge,
            installments: Vec::new(),
            plan_type: None,
        };
        self.store.stash(record.clone())?;

        warn!(
            student_id = %record.student_id,
            allocation_id = %record.id,
            payable = %record.payable_amount,
            "allocation parked in fallback cache"
        );
        self.events.emit(Event::AllocationParked {
            student_id: record.student_id,
            allocation_id: record.id,
            payable_amount: record.payable_amount,
            operator: ctx.operator_id(),
            timestamp: ctx.now(),
        });
        Ok(Persisted::fallback(record))
    }

    /// the student's allocations, parked ones included
    pub fn fee_records(
        &self,
        ctx: &ExecutionContext,
        student_id: StudentId,
    ) -> Result<Vec<Persisted<StudentFeeRecord>>> {
        self.store.merge(
            "fetch fee allocations",
            self.backend.get_fee_allocations_for_student(ctx, student_id),
            |r: &StudentFeeRecord| r.student_id == student_id,
        )
    }

    fn drop_parked(&mut self, proposal: &AllocationProposal) -> Result<()> {
        let parked = self.store.pending::<StudentFeeRecord>()?;
        for record in parked.iter().filter(|r| {
            r.student_id == proposal.request.student_id
                && r.total_amount.within(
                    proposal.request.expected_base_amount,
                    self.config.tolerance.allocation_match,
                )
        }) {
            self.store.evict::<StudentFeeRecord>(&(record.student_id, record.id))?;
        }
        Ok(())
    }

    // schedule

    pub fn draft_schedule(&self, record: &StudentFeeRecord, plan_type: PlanType) -> Result<ScheduleDraft> {
        ScheduleDraft::new(record.payable_amount, plan_type)
    }

    /// validate and save; replaces any earlier plan for the allocation
    pub fn save_installment_plan(
        &mut self,
        ctx: &ExecutionContext,
        record: &StudentFeeRecord,
        draft: &ScheduleDraft,
    ) -> Result<Persisted<InstallmentPlan>> {
        if draft.payable_amount() != record.payable_amount {
            return Err(FeeError::ScheduleSumMismatch {
                expected: record.payable_amount,
                actual: draft.payable_amount(),
            });
        }
        let plan = draft.finalize(record.student_id, record.id, self.config.tolerance.schedule_sum)?;
        let student_id = record.student_id;
        let backend = &mut self.backend;
        let saved = self.store.write(
            "save installment plan",
            WritePolicy::FallbackOnTransport,
            plan,
            |payload| backend.create_installment_plan(ctx, student_id, payload),
        )?;

        info!(
            %student_id,
            allocation_id = %record.id,
            installments = saved.record.installments.len(),
            total = %saved.record.total(),
            origin = ?saved.origin,
            "installment plan saved"
        );
        self.events.emit(Event::InstallmentPlanSaved {
            student_id,
            allocation_id: record.id,
            plan_type: saved.record.plan_type,
            installments: saved.record.installments.len(),
            total: saved.record.total(),
            origin: saved.origin,
            operator: ctx.operator_id(),
            timestamp: ctx.now(),
        });
        Ok(saved)
    }

    // payments

    pub fn payments(
        &self,
        ctx: &ExecutionContext,
        allocation_id: AllocationId,
    ) -> Result<Vec<Persisted<PaymentRecord>>> {
        self.store.merge(
            "fetch payments",
            self.backend.get_payments(ctx, allocation_id),
            |p: &PaymentRecord| p.allocation_id == allocation_id,
        )
    }

    /// full ledger for validation; an unreachable backend is an error, not an empty history
    fn ledger(&self, ctx: &ExecutionContext, allocation_id: AllocationId) -> Result<Vec<PaymentRecord>> {
        Ok(self
            .store
            .merge_strict(
                "fetch payments",
                self.backend.get_payments(ctx, allocation_id),
                |p: &PaymentRecord| p.allocation_id == allocation_id,
            )?
            .into_iter()
            .map(|p| p.record)
            .collect())
    }

    pub fn balance(&self, ctx: &ExecutionContext, record: &StudentFeeRecord) -> Result<AllocationBalance> {
        let ledger = self.ledger(ctx, record.id)?;
        Ok(AllocationBalance::new(record.id, record.payable_amount, &ledger))
    }

    /// record a payment of `0 < amount <= pending`
    pub fn record_payment(
        &mut self,
        ctx: &ExecutionContext,
        record: &StudentFeeRecord,
        input: PaymentInput,
    ) -> Result<PaymentReceipt> {
        let mut ledger = self.ledger(ctx, record.id)?;
        let balance = AllocationBalance::new(record.id, record.payable_amount, &ledger);
        balance.validate_payment(input.amount)?;

        let reference = if input.reference.trim().is_empty() {
            generate_reference("RCPT")
        } else {
            input.reference
        };
        let payment = PaymentRecord {
            id: Uuid::new_v4(),
            allocation_id: record.id,
            amount: input.amount,
            date: input.date,
            mode: input.mode,
            reference,
            kind: PaymentKind::Payment,
        };

        let allocation_id = record.id;
        let backend = &mut self.backend;
        let saved = self.store.write(
            "record payment",
            WritePolicy::AppendOnTransport,
            payment,
            |payload| backend.record_payment(ctx, allocation_id, payload),
        )?;

        ledger.push(saved.record.clone());
        let after = AllocationBalance::new(record.id, record.payable_amount, &ledger);
        info!(
            %allocation_id,
            amount = %saved.record.amount,
            reference = %saved.record.reference,
            paid = %after.total_paid(),
            pending = %after.pending(),
            origin = ?saved.origin,
            "payment recorded"
        );
        self.events.emit(Event::PaymentRecorded {
            payment_id: saved.record.id,
            allocation_id,
            amount: saved.record.amount,
            date: saved.record.date,
            reference: saved.record.reference.clone(),
            status_after: after.status(),
            origin: saved.origin,
            operator: ctx.operator_id(),
            timestamp: ctx.now(),
        });

        Ok(PaymentReceipt {
            payment: saved,
            paid_after: after.total_paid(),
            pending_after: after.pending(),
            status_after: after.status(),
        })
    }

    /// partial or full refund; never cached locally
    pub fn refund(
        &mut self,
        ctx: &ExecutionContext,
        record: &StudentFeeRecord,
        payment_id: PaymentId,
        amount: Money,
        reference: Option<String>,
    ) -> Result<RefundOutcome> {
        let ledger = self.ledger(ctx, record.id)?;
        let balance = AllocationBalance::new(record.id, record.payable_amount, &ledger);
        let reference = reference.unwrap_or_else(|| generate_reference("RFND"));
        let outcome = RefundPlanner::refund(&balance, &ledger, payment_id, amount, ctx.today(), reference)?;
        let outcome = self.submit_adjustment(ctx, "initiate refund", payment_id, outcome)?;

        self.events.emit(Event::RefundIssued {
            refund_id: outcome.record.id,
            payment_id,
            allocation_id: record.id,
            amount,
            status_after: outcome.status_after,
            operator: ctx.operator_id(),
            timestamp: ctx.now(),
        });
        Ok(outcome)
    }

    /// refund whatever is still standing on one payment
    pub fn reverse_payment(
        &mut self,
        ctx: &ExecutionContext,
        record: &StudentFeeRecord,
        payment_id: PaymentId,
        reference: Option<String>,
    ) -> Result<RefundOutcome> {
        let ledger = self.ledger(ctx, record.id)?;
        let balance = AllocationBalance::new(record.id, record.payable_amount, &ledger);
        let reference = reference.unwrap_or_else(|| generate_reference("RVSL"));
        let outcome = RefundPlanner::reverse(&balance, &ledger, payment_id, ctx.today(), reference)?;
        let outcome = self.submit_adjustment(ctx, "reverse payment", payment_id, outcome)?;

        self.events.emit(Event::PaymentReversed {
            reversal_id: outcome.record.id,
            payment_id,
            allocation_id: record.id,
            amount: -outcome.record.amount,
            status_after: outcome.status_after,
            operator: ctx.operator_id(),
            timestamp: ctx.now(),
        });
        Ok(outcome)
    }

    fn submit_adjustment(
        &mut self,
        ctx: &ExecutionContext,
        operation: &str,
        payment_id: PaymentId,
        outcome: RefundOutcome,
    ) -> Result<RefundOutcome> {
        let backend = &mut self.backend;
        let saved = self.store.write(operation, WritePolicy::RemoteOnly, outcome.record.clone(), |payload| {
            backend.initiate_refund(ctx, payment_id, payload)
        })?;

        if let Some(detail) = &outcome.anomaly {
            self.events.emit(Event::PaidTotalClamped {
                allocation_id: saved.record.allocation_id,
                raw_total: outcome.paid_before + saved.record.amount,
                detail: detail.clone(),
                timestamp: ctx.now(),
            });
        }
        info!(
            operation,
            %payment_id,
            amount = %saved.record.amount,
            paid_after = %outcome.paid_after,
            "payment adjusted"
        );
        Ok(RefundOutcome {
            record: saved.record,
            ..outcome
        })
    }

    /// allocation, derived installment states and ledger in one view
    pub fn statement(
        &self,
        ctx: &ExecutionContext,
        student_id: StudentId,
        allocation_id: AllocationId,
    ) -> Result<AllocationStatement> {
        let record = self
            .fee_records(ctx, student_id)?
            .into_iter()
            .find(|r| r.record.id == allocation_id)
            .ok_or_else(|| FeeError::DataIntegrity {
                message: format!("allocation {allocation_id} not found for student {student_id}"),
            })?;

        // a plan the backend already holds outranks an unsynced local one
        let pending = if record.is_synced() && record.record.has_plan() {
            None
        } else {
            self.store.find::<InstallmentPlan>(&(student_id, allocation_id))?
        };
        let plan = match pending {
            Some(pending) => PlanSource {
                plan_type: Some(pending.plan_type),
                installments: pending.installments,
                origin: Origin::Fallback,
            },
            None => PlanSource {
                plan_type: record.record.plan_type,
                installments: record.record.installments.clone(),
                origin: record.origin,
            },
        };
        let payments = self.payments(ctx, allocation_id)?;

        Ok(AllocationStatement::build(
            &record,
            Some(plan),
            &payments,
            self.config.tolerance.schedule_sum,
            ctx.now(),
        ))
    }

    // discounts

    pub fn create_discount(&mut self, ctx: &ExecutionContext, rule: NewDiscountRule) -> Result<DiscountRule> {
        rule.validate()?;
        let created = self
            .backend
            .create_fee_discount(ctx, &rule)
            .map_err(|err| FeeError::remote("create fee discount", err))?;

        info!(discount_id = %created.id, scope = ?created.scope, scope_id = %created.scope_id, "discount created");
        self.events.emit(Event::DiscountCreated {
            discount_id: created.id,
            scope: created.scope,
            scope_id: created.scope_id,
            operator: ctx.operator_id(),
            timestamp: ctx.now(),
        });
        Ok(created)
    }

    pub fn delete_discount(&mut self, ctx: &ExecutionContext, discount_id: DiscountId) -> Result<()> {
        self.backend
            .delete_fee_discount(ctx, discount_id)
            .map_err(|err| FeeError::remote("delete fee discount", err))?;

        info!(%discount_id, "discount deleted");
        self.events.emit(Event::DiscountDeleted {
            discount_id,
            operator: ctx.operator_id(),
            timestamp: ctx.now(),
        });
        Ok(())
    }

    pub fn list_discounts(
        &self,
        ctx: &ExecutionContext,
        scope: DiscountScope,
        scope_id: Uuid,
    ) -> Result<Vec<DiscountRule>> {
        self.backend
            .get_fee_discounts(ctx, scope, scope_id)
            .map_err(|err| FeeError::remote("list fee discounts", err))
    }

    // admission

    /// enroll, then plan the allocation; an unreachable backend defers the allocation step
    pub fn admit(&mut self, ctx: &ExecutionContext, request: AdmissionRequest) -> Result<Admission> {
        let enrollment = self.enroll_student(ctx, request.batch_id, request.student_id)?;

        match self.plan_admission_fee(ctx, &request) {
            Ok(plan) => Ok(Admission {
                enrollment,
                allocation: AllocationStep::Planned(plan),
            }),
            Err(err) if err.is_transport() => {
                warn!(
                    student_id = %request.student_id,
                    error = %err,
                    "allocation lookup failed, deferring fee allocation"
                );
                Ok(Admission {
                    enrollment,
                    allocation: AllocationStep::Deferred {
                        reason: err.to_string(),
                    },
                })
            }
            Err(err) => Err(FeeError::PartialProgress {
                step: "plan fee allocation".to_string(),
                completed: vec![format!(
                    "enrollment of {} in batch {} ({:?})",
                    request.student_id, request.batch_id, enrollment.origin
                )],
                source: Box::new(err),
            }),
        }
    }

    fn plan_admission_fee(
        &mut self,
        ctx: &ExecutionContext,
        request: &AdmissionRequest,
    ) -> Result<AllocationPlan> {
        let expected_base_amount = match request.expected_base_amount {
            Some(amount) => amount,
            None => self.base_fee(ctx, request.course_id, Some(request.batch_id))?,
        };
        self.plan_allocation(
            ctx,
            AllocationRequest {
                student_id: request.student_id,
                course_id: request.course_id,
                batch_id: Some(request.batch_id),
                expected_base_amount,
                structure_name: request.structure_name.clone(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Credentials, Operator};
    use crate::store::{InMemoryBackend, MemoryCache, RemoteError};
    use crate::types::{DiscountType, PaymentMode};
    use chrono::{NaiveDate, TimeZone, Utc};
    use hourglass_rs::{SafeTimeProvider, TimeSource};
    use rust_decimal_macros::dec;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(
            Operator { id: Uuid::new_v4(), name: "cashier".to_string() },
            Credentials::bearer("token"),
            SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 5, 10, 11, 0, 0).unwrap())),
        )
    }

    fn desk(backend: InMemoryBackend) -> FeeDesk<InMemoryBackend, MemoryCache> {
        FeeDesk::new(backend, MemoryCache::new(), FeeConfig::default()).unwrap()
    }

    fn input(amount: i64, reference: &str) -> PaymentInput {
        PaymentInput {
            amount: Money::from_major(amount),
            date: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            mode: PaymentMode::Cash,
            reference: reference.to_string(),
        }
    }

    fn created_record(desk: &mut FeeDesk<InMemoryBackend, MemoryCache>, ctx: &ExecutionContext, amount: i64) -> StudentFeeRecord {
        let resolution = desk
            .resolve_or_create(
                ctx,
                AllocationRequest {
                    student_id: Uuid::new_v4(),
                    course_id: Uuid::new_v4(),
                    batch_id: None,
                    expected_base_amount: Money::from_major(amount),
                    structure_name: None,
                },
                Some(Confirmation::Confirmed),
            )
            .unwrap();
        resolution.record().clone()
    }

    #[test]
    fn test_base_fee_prefers_batch_amount() {
        let ctx = ctx();
        let mut backend = InMemoryBackend::new();
        let course = backend.add_course("Data Science", Some(Money::from_major(25_000)));
        let batch = backend.add_batch(course, "Evening");
        let student = backend.add_student(batch, "R. Iyer");
        let fees = desk(backend);

        assert_eq!(fees.base_fee(&ctx, course, Some(batch)).unwrap(), Money::from_major(25_000));
        assert_eq!(fees.roster(&ctx, batch).unwrap()[0].id, student);

        let mut backend = InMemoryBackend::new();
        let bare = backend.add_course("Workshop", None);
        let fees = desk(backend);
        assert!(matches!(
            fees.base_fee(&ctx, bare, None),
            Err(FeeError::BaseFeeUnavailable { .. })
        ));
    }

    #[test]
    fn test_enroll_twice_yields_one_record() {
        let ctx = ctx();
        let mut desk = desk(InMemoryBackend::new());
        let (batch, student) = (Uuid::new_v4(), Uuid::new_v4());

        let first = desk.enroll_student(&ctx, batch, student).unwrap();
        let second = desk.enroll_student(&ctx, batch, student).unwrap();
        assert_eq!(first, second);
        assert_eq!(desk.enrollments(&ctx, batch).unwrap().len(), 1);

        let other = Uuid::new_v4();
        desk.backend_mut().go_offline(RemoteError::Timeout { millis: 3_000 });
        let first = desk.enroll_student(&ctx, batch, other).unwrap();
        let second = desk.enroll_student(&ctx, batch, other).unwrap();
        assert_eq!(first.origin, Origin::Fallback);
        assert_eq!(first, second);
        assert_eq!(desk.store().pending::<Enrollment>().unwrap(), vec![first.record]);
    }

    #[test]
    fn test_unenroll_offline_writes_tombstone() {
        let ctx = ctx();
        let mut desk = desk(InMemoryBackend::new());
        let (batch, student) = (Uuid::new_v4(), Uuid::new_v4());

        desk.backend_mut().go_offline(RemoteError::Unreachable { message: "vpn".to_string() });
        desk.enroll_student(&ctx, batch, student).unwrap();
        assert_eq!(desk.enrollments(&ctx, batch).unwrap().len(), 1);

        assert_eq!(desk.unenroll_student(&ctx, batch, student).unwrap(), Origin::Fallback);
        assert!(desk.enrollments(&ctx, batch).unwrap().is_empty());
    }

    #[test]
    fn test_payment_over_pending_is_rejected() {
        let ctx = ctx();
        let mut desk = desk(InMemoryBackend::new());
        let record = created_record(&mut desk, &ctx, 25_000);

        let err = desk.record_payment(&ctx, &record, input(30_000, "R-1")).unwrap_err();
        assert!(matches!(err, FeeError::Overpayment { .. }));
        assert!(err.is_validation());
        assert!(desk.payments(&ctx, record.id).unwrap().is_empty());

        let receipt = desk.record_payment(&ctx, &record, input(10_000, "")).unwrap();
        assert!(receipt.payment.is_synced());
        assert!(receipt.payment.record.reference.starts_with("RCPT-"));
        assert_eq!(receipt.pending_after, Money::from_major(15_000));
        assert_eq!(receipt.status_after, AllocationStatus::Partial);
    }

    #[test]
    fn test_duplicate_reference_is_not_cached() {
        let ctx = ctx();
        let mut desk = desk(InMemoryBackend::new());
        let record = created_record(&mut desk, &ctx, 5_000);

        desk.record_payment(&ctx, &record, input(1_000, "R-7")).unwrap();
        let err = desk.record_payment(&ctx, &record, input(1_000, "R-7")).unwrap_err();
        assert!(matches!(err, FeeError::Rejected { status: 409, .. }));
        assert!(desk.store().pending::<PaymentRecord>().unwrap().is_empty());
    }

    #[test]
    fn test_offline_payment_is_counted_until_synced() {
        let ctx = ctx();
        let mut desk = desk(InMemoryBackend::new());
        let record = created_record(&mut desk, &ctx, 5_000);

        desk.backend_mut().fail("record_payment", RemoteError::Timeout { millis: 8_000 });
        let receipt = desk.record_payment(&ctx, &record, input(2_000, "R-OFF")).unwrap();
        assert_eq!(receipt.payment.origin, Origin::Fallback);

        // the cached payment still counts against the pending balance
        let err = desk.record_payment(&ctx, &record, input(3_500, "R-2")).unwrap_err();
        assert!(matches!(err, FeeError::Overpayment { .. }));

        desk.backend_mut().clear_failures();
        let resent = desk.record_payment(&ctx, &record, input(3_000, "R-3")).unwrap();
        assert_eq!(resent.status_after, AllocationStatus::Paid);
    }

    #[test]
    fn test_offline_reference_collision_keeps_first_payment() {
        let ctx = ctx();
        let mut desk = desk(InMemoryBackend::new());
        let record = created_record(&mut desk, &ctx, 10_000);

        desk.backend_mut().fail("record_payment", RemoteError::Timeout { millis: 8_000 });
        desk.record_payment(&ctx, &record, input(3_000, "CASH")).unwrap();
        let err = desk.record_payment(&ctx, &record, input(2_000, "CASH")).unwrap_err();
        assert!(matches!(err, FeeError::Rejected { status: 409, .. }));
        assert!(!err.is_transport());

        let payments = desk.payments(&ctx, record.id).unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].record.amount, Money::from_major(3_000));
        assert_eq!(desk.balance(&ctx, &record).unwrap().total_paid(), Money::from_major(3_000));
    }

    #[test]
    fn test_payment_needs_a_reachable_ledger() {
        let ctx = ctx();
        let mut desk = desk(InMemoryBackend::new());
        let record = created_record(&mut desk, &ctx, 10_000);
        desk.record_payment(&ctx, &record, input(10_000, "NEFT-1")).unwrap();

        desk.backend_mut().go_offline(RemoteError::Unreachable { message: "dns".to_string() });
        let err = desk.record_payment(&ctx, &record, input(10_000, "NEFT-2")).unwrap_err();
        assert!(err.is_transport());
        assert!(desk.store().pending::<PaymentRecord>().unwrap().is_empty());
        assert!(desk.balance(&ctx, &record).unwrap_err().is_transport());

        // read views still degrade to the fallback cache
        assert!(desk.payments(&ctx, record.id).unwrap().is_empty());
    }

    #[test]
    fn test_statement_prefers_plan_held_by_backend() {
        let ctx = ctx();
        let mut desk = desk(InMemoryBackend::new());
        let record = created_record(&mut desk, &ctx, 9_000);

        let mut draft = desk.draft_schedule(&record, PlanType::Single).unwrap();
        draft.set_due_date(0, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()).unwrap();
        desk.backend_mut().fail("create_installment_plan", RemoteError::Timeout { millis: 1 });
        let local = desk.save_installment_plan(&ctx, &record, &draft).unwrap();
        assert_eq!(local.origin, Origin::Fallback);
        desk.backend_mut().clear_failures();

        let mut other = desk.draft_schedule(&record, PlanType::Custom(3)).unwrap();
        other.assign_monthly_due_dates(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()).unwrap();
        let remote = other.finalize(record.student_id, record.id, Money::ONE).unwrap();
        desk.backend_mut()
            .create_installment_plan(&ctx, record.student_id, &remote)
            .unwrap();

        let statement = desk.statement(&ctx, record.student_id, record.id).unwrap();
        let view = statement.plan.as_ref().unwrap();
        assert_eq!(view.origin, Origin::Remote);
        assert_eq!(view.plan_type, Some(PlanType::Custom(3)));
        assert_eq!(view.installments.len(), 3);
        assert_eq!(statement.unsynced_count(), 0);
    }

    #[test]
    fn test_refund_is_remote_only() {
        let ctx = ctx();
        let mut desk = desk(InMemoryBackend::new());
        let record = created_record(&mut desk, &ctx, 5_000);
        let receipt = desk.record_payment(&ctx, &record, input(5_000, "R-1")).unwrap();
        let payment_id = receipt.payment.record.id;

        desk.backend_mut().fail("initiate_refund", RemoteError::Timeout { millis: 1 });
        let err = desk
            .refund(&ctx, &record, payment_id, Money::from_major(500), None)
            .unwrap_err();
        assert!(err.is_transport());
        assert!(desk.store().pending::<PaymentRecord>().unwrap().is_empty());

        desk.backend_mut().clear_failures();
        let outcome = desk
            .refund(&ctx, &record, payment_id, Money::from_major(500), None)
            .unwrap();
        assert_eq!(outcome.paid_after, Money::from_major(4_500));
        assert_eq!(outcome.status_after, AllocationStatus::Partial);

        let reversal = desk.reverse_payment(&ctx, &record, payment_id, None).unwrap();
        assert_eq!(reversal.record.amount, Money::from_major(-4_500));
        assert_eq!(reversal.status_after, AllocationStatus::Pending);
    }

    #[test]
    fn test_parked_allocation_is_merged_and_dropped_on_confirm() {
        let ctx = ctx();
        let mut desk = desk(InMemoryBackend::new());
        let request = AllocationRequest {
            student_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            batch_id: None,
            expected_base_amount: Money::from_major(12_000),
            structure_name: Some("Diploma".to_string()),
        };
        let AllocationPlan::NeedsConfirmation(proposal) =
            desk.plan_allocation(&ctx, request.clone()).unwrap()
        else {
            panic!("expected a proposal");
        };

        desk.backend_mut().fail("create_fee_structure", RemoteError::Timeout { millis: 1 });
        let err = desk
            .confirm_allocation(&ctx, &proposal, Confirmation::Confirmed)
            .unwrap_err();
        assert!(err.is_transport());
        desk.park_allocation(&ctx, &proposal).unwrap();

        let records = desk.fee_records(&ctx, request.student_id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].origin, Origin::Fallback);

        desk.backend_mut().clear_failures();
        desk.confirm_allocation(&ctx, &proposal, Confirmation::Confirmed).unwrap();
        let records = desk.fee_records(&ctx, request.student_id).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_synced());
    }

    #[test]
    fn test_parked_allocation_within_tolerance_is_dropped() {
        let ctx = ctx();
        let mut desk = desk(InMemoryBackend::new());
        let request = AllocationRequest {
            student_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            batch_id: None,
            expected_base_amount: Money::from_major(12_000),
            structure_name: None,
        };
        let AllocationPlan::NeedsConfirmation(parked) =
            desk.plan_allocation(&ctx, request.clone()).unwrap()
        else {
            panic!("expected a proposal");
        };
        desk.park_allocation(&ctx, &parked).unwrap();

        let rounded = AllocationRequest {
            expected_base_amount: Money::from_str_exact("12000.50").unwrap(),
            ..request.clone()
        };
        let AllocationPlan::NeedsConfirmation(proposal) = desk.plan_allocation(&ctx, rounded).unwrap()
        else {
            panic!("expected a proposal");
        };
        desk.confirm_allocation(&ctx, &proposal, Confirmation::Confirmed).unwrap();

        assert!(desk.store().pending::<StudentFeeRecord>().unwrap().is_empty());
        let records = desk.fee_records(&ctx, request.student_id).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_synced());
    }

    #[test]
    fn test_discount_management() {
        let ctx = ctx();
        let mut desk = desk(InMemoryBackend::new());
        let student = Uuid::new_v4();
        let rule = NewDiscountRule {
            fee_structure_id: None,
            scope: DiscountScope::Student,
            scope_id: student,
            discount_type: DiscountType::Percentage,
            value: dec!(120),
            admission_fee: Money::ZERO,
        };
        assert!(matches!(
            desk.create_discount(&ctx, rule.clone()),
            Err(FeeError::InvalidDiscount { .. })
        ));

        let created = desk
            .create_discount(&ctx, NewDiscountRule { value: dec!(10), ..rule })
            .unwrap();
        assert_eq!(desk.list_discounts(&ctx, DiscountScope::Student, student).unwrap().len(), 1);

        desk.delete_discount(&ctx, created.id).unwrap();
        assert!(desk.list_discounts(&ctx, DiscountScope::Student, student).unwrap().is_empty());
        assert!(matches!(
            desk.delete_discount(&ctx, created.id),
            Err(FeeError::Rejected { status: 404, .. })
        ));
    }
}
