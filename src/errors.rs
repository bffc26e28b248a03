use thiserror::Error;
use uuid::Uuid;

use crate::decimal::Money;
use crate::store::RemoteError;

#[derive(Error, Debug)]
pub enum FeeError {
    #[error("{operation} failed: backend unreachable ({source})")]
    Transport {
        operation: String,
        #[source]
        source: RemoteError,
    },

    #[error("{operation} rejected by backend (status {status}): {message}")]
    Rejected {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("invalid installment count: {count} (must be at least 1)")]
    InvalidInstallmentCount {
        count: i64,
    },

    #[error("installment {position} ({name}) has no due date")]
    MissingDueDate {
        position: usize,
        name: String,
    },

    #[error("installments sum to {actual} but payable amount is {expected}")]
    ScheduleSumMismatch {
        expected: Money,
        actual: Money,
    },

    #[error("installment {index} does not exist (schedule has {len})")]
    InstallmentNotFound {
        index: usize,
        len: usize,
    },

    #[error("cannot remove installment: schedule has only {len}")]
    LastInstallment {
        len: usize,
    },

    #[error("invalid amount: {amount}")]
    InvalidAmount {
        amount: Money,
    },

    #[error("over-payment: {amount} exceeds pending balance {pending} on allocation {allocation_id}")]
    Overpayment {
        allocation_id: Uuid,
        amount: Money,
        pending: Money,
    },

    #[error("refund of {requested} exceeds {available} paid on payment {payment_id}")]
    RefundExceedsPayment {
        payment_id: Uuid,
        available: Money,
        requested: Money,
    },

    #[error("payment not found: {id}")]
    PaymentNotFound {
        id: Uuid,
    },

    #[error("payment {id} has already been reversed")]
    AlreadyReversed {
        id: Uuid,
    },

    #[error("invalid discount rule: {message}")]
    InvalidDiscount {
        message: String,
    },

    #[error("no fee allocation of {expected_amount} found for student {student_id}; operator confirmation required to create one")]
    ConfirmationRequired {
        student_id: Uuid,
        expected_amount: Money,
    },

    #[error("discount lookup for student {student_id} failed; acknowledge the missing discount before creating the allocation")]
    UnacknowledgedWarning {
        student_id: Uuid,
    },

    #[error("no base fee configured for course {course_id}")]
    BaseFeeUnavailable {
        course_id: Uuid,
    },

    #[error("data integrity anomaly: {message}")]
    DataIntegrity {
        message: String,
    },

    #[error("{step} failed after completing [{}]: {source}", .completed.join(", "))]
    PartialProgress {
        step: String,
        completed: Vec<String>,
        #[source]
        source: Box<FeeError>,
    },

    #[error("fallback cache error: {message}")]
    Cache {
        message: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },
}

impl FeeError {
    /// map a backend failure for the named operation
    pub fn remote(operation: &str, err: RemoteError) -> Self {
        match err {
            RemoteError::Rejected { status, message } => FeeError::Rejected {
                operation: operation.to_string(),
                status,
                message,
            },
            other => FeeError::Transport {
                operation: operation.to_string(),
                source: other,
            },
        }
    }

    /// network-level failure, eligible for the fallback path
    pub fn is_transport(&self) -> bool {
        match self {
            FeeError::Transport { .. } => true,
            FeeError::PartialProgress { source, .. } => source.is_transport(),
            _ => false,
        }
    }

    /// operator input problem, never retried
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            FeeError::InvalidInstallmentCount { .. }
                | FeeError::MissingDueDate { .. }
                | FeeError::ScheduleSumMismatch { .. }
                | FeeError::InstallmentNotFound { .. }
                | FeeError::LastInstallment { .. }
                | FeeError::InvalidAmount { .. }
                | FeeError::Overpayment { .. }
                | FeeError::RefundExceedsPayment { .. }
                | FeeError::InvalidDiscount { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FeeError>;
