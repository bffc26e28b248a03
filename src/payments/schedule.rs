use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{FeeError, Result};
use crate::store::CacheRecord;
use crate::types::{AllocationId, PlanType, StudentId};

/// one tranche of an installment plan; its status is always derived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub id: Uuid,
    pub name: String,
    pub amount: Money,
    pub due_date: Option<NaiveDate>,
}

/// saved split of an allocation's payable amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentPlan {
    pub student_id: StudentId,
    pub allocation_id: AllocationId,
    pub plan_type: PlanType,
    pub installments: Vec<Installment>,
}

impl InstallmentPlan {
    pub fn total(&self) -> Money {
        self.installments.iter().map(|i| i.amount).sum()
    }
}

impl CacheRecord for InstallmentPlan {
    type Key = (StudentId, AllocationId);
    const COLLECTION: &'static str = "installment_plans";

    fn natural_key(&self) -> Self::Key {
        (self.student_id, self.allocation_id)
    }
}

/// splits a payable amount into equal whole-unit tranches
pub struct ScheduleBuilder;

impl ScheduleBuilder {
    /// `n - 1` tranches of `floor(payable / n)`, the last one absorbs the remainder
    pub fn build(payable: Money, plan_type: PlanType) -> Result<Vec<Installment>> {
        let count = plan_type.installment_count()?;
        if payable.is_negative() {
            return Err(FeeError::InvalidAmount { amount: payable });
        }

        let base = payable.floor_div(count);
        let remainder = payable - base.times(count);

        let installments = (1..=count)
            .map(|i| Installment {
                id: Uuid::new_v4(),
                name: format!("Installment {i}"),
                amount: if i == count { base + remainder } else { base },
                due_date: None,
            })
            .collect();

        debug!(%payable, count, %base, %remainder, "built installment schedule");
        Ok(installments)
    }
}

/// editable schedule held by the operator before saving
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleDraft {
    payable_amount: Money,
    plan_type: PlanType,
    installments: Vec<Installment>,
}

impl ScheduleDraft {
    pub fn new(payable_amount: Money, plan_type: PlanType) -> Result<Self> {
        let installments = ScheduleBuilder::build(payable_amount, plan_type)?;
        Ok(Self {
            payable_amount,
            plan_type,
            installments,
        })
    }

    pub fn payable_amount(&self) -> Money {
        self.payable_amount
    }

    pub fn plan_type(&self) -> PlanType {
        self.plan_type
    }

    pub fn installments(&self) -> &[Installment] {
        &self.installments
    }

    pub fn total(&self) -> Money {
        self.installments.iter().map(|i| i.amount).sum()
    }

    /// switching plan or custom count regenerates every row
    pub fn change_plan(&mut self, plan_type: PlanType) -> Result<()> {
        self.installments = ScheduleBuilder::build(self.payable_amount, plan_type)?;
        self.plan_type = plan_type;
        Ok(())
    }

    pub fn set_amount(&mut self, index: usize, amount: Money) -> Result<()> {
        if amount.is_negative() {
            return Err(FeeError::InvalidAmount { amount });
        }
        self.get_mut(index)?.amount = amount;
        Ok(())
    }

    pub fn rename(&mut self, index: usize, name: impl Into<String>) -> Result<()> {
        self.get_mut(index)?.name = name.into();
        Ok(())
    }

    pub fn set_due_date(&mut self, index: usize, due_date: NaiveDate) -> Result<()> {
        self.get_mut(index)?.due_date = Some(due_date);
        Ok(())
    }

    /// drop one row; amounts are not rebalanced
    pub fn remove(&mut self, index: usize) -> Result<Installment> {
        let len = self.installments.len();
        if index >= len {
            return Err(FeeError::InstallmentNotFound { index, len });
        }
        if len < 2 {
            return Err(FeeError::LastInstallment { len });
        }
        Ok(self.installments.remove(index))
    }

    /// fill every due date at monthly steps from `first_due`
    pub fn assign_monthly_due_dates(&mut self, first_due: NaiveDate) -> Result<()> {
        for (i, installment) in self.installments.iter_mut().enumerate() {
            let due = first_due
                .checked_add_months(Months::new(i as u32))
                .ok_or_else(|| FeeError::InvalidConfiguration {
                    message: format!("due date out of range for installment {}", i + 1),
                })?;
            installment.due_date = Some(due);
        }
        Ok(())
    }

    /// checks run before a plan may be saved
    pub fn validate(&self, tolerance: Money) -> Result<()> {
        for (i, installment) in self.installments.iter().enumerate() {
            if installment.due_date.is_none() {
                return Err(FeeError::MissingDueDate {
                    position: i + 1,
                    name: installment.name.clone(),
                });
            }
        }
        let total = self.total();
        if !total.within(self.payable_amount, tolerance) {
            return Err(FeeError::ScheduleSumMismatch {
                expected: self.payable_amount,
                actual: total,
            });
        }
        Ok(())
    }

    /// validated plan for the given allocation
    pub fn finalize(
        &self,
        student_id: StudentId,
        allocation_id: AllocationId,
        tolerance: Money,
    ) -> Result<InstallmentPlan> {
        self.validate(tolerance)?;
        Ok(InstallmentPlan {
            student_id,
            allocation_id,
            plan_type: self.plan_type,
            installments: self.installments.clone(),
        })
    }

    fn get_mut(&mut self, index: usize) -> Result<&mut Installment> {
        let len = self.installments.len();
        self.installments
            .get_mut(index)
            .ok_or(FeeError::InstallmentNotFound { index, len })
    }
}
