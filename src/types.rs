use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{FeeError, Result};

pub type StudentId = Uuid;
pub type CourseId = Uuid;
pub type BatchId = Uuid;
pub type FeeStructureId = Uuid;
pub type AllocationId = Uuid;
pub type DiscountId = Uuid;
pub type PaymentId = Uuid;

/// who a discount rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountScope {
    Student,
    Batch,
}

/// how a discount value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    /// absolute amount off the discountable portion
    Flat,
    /// percentage of the discountable portion
    Percentage,
}

/// upper bound on the number of tranches in one plan
pub const MAX_INSTALLMENTS: u32 = 120;

/// installment plan type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanType {
    Single,
    Quarterly,
    HalfYearly,
    Yearly,
    Custom(u32),
}

impl PlanType {
    /// custom plan from an operator-entered count in `1..=MAX_INSTALLMENTS`
    pub fn custom(count: i64) -> Result<Self> {
        if count < 1 || count > i64::from(MAX_INSTALLMENTS) {
            return Err(FeeError::InvalidInstallmentCount { count });
        }
        Ok(PlanType::Custom(count as u32))
    }

    /// number of tranches this plan splits into
    pub fn installment_count(&self) -> Result<u32> {
        match self {
            PlanType::Single => Ok(1),
            PlanType::Quarterly => Ok(4),
            PlanType::HalfYearly => Ok(6),
            PlanType::Yearly => Ok(12),
            PlanType::Custom(n) if *n == 0 || *n > MAX_INSTALLMENTS => {
                Err(FeeError::InvalidInstallmentCount { count: i64::from(*n) })
            }
            PlanType::Custom(n) => Ok(*n),
        }
    }
}

/// derived state of one installment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallmentStatus {
    Pending,
    Partial,
    Paid,
}

/// derived state of a whole allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStatus {
    Pending,
    Partial,
    Paid,
}

/// how money was received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMode {
    Cash,
    Upi,
    Card,
    BankTransfer,
    Cheque,
}

/// enrollment lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Active,
    Withdrawn,
}
