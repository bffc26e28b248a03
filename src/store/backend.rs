use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::allocation::{FeeAllocation, FeeStructure, NewFeeAllocation, NewFeeStructure, StudentFeeRecord};
use crate::context::ExecutionContext;
use crate::decimal::Money;
use crate::discounts::{DiscountRule, NewDiscountRule};
use crate::enrollment::Enrollment;
use crate::payments::{InstallmentPlan, PaymentRecord};
use crate::types::{AllocationId, BatchId, CourseId, DiscountId, DiscountScope, PaymentId, StudentId};

/// failure reported by the remote system of record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("unreachable: {message}")]
    Unreachable { message: String },

    #[error("timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// the backend answered and refused the request
    #[error("status {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl RemoteError {
    pub fn is_transport(&self) -> bool {
        !matches!(self, RemoteError::Rejected { .. })
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        RemoteError::Rejected {
            status: 404,
            message: format!("{what} not found"),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        RemoteError::Rejected {
            status: 409,
            message: message.into(),
        }
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// course, batch or student as listed by the catalog endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: Uuid,
    pub name: String,
    pub amount: Option<Money>,
}

/// the remote system of record, as seen by the fee subsystem
pub trait FeeBackend {
    fn get_courses(&self, ctx: &ExecutionContext) -> RemoteResult<Vec<CatalogEntry>>;

    fn get_batches_by_course(
        &self,
        ctx: &ExecutionContext,
        course_id: CourseId,
    ) -> RemoteResult<Vec<CatalogEntry>>;

    fn get_students_by_batch(
        &self,
        ctx: &ExecutionContext,
        batch_id: BatchId,
    ) -> RemoteResult<Vec<CatalogEntry>>;

    fn get_fee_allocations_for_student(
        &self,
        ctx: &ExecutionContext,
        student_id: StudentId,
    ) -> RemoteResult<Vec<StudentFeeRecord>>;

    fn create_fee_structure(
        &mut self,
        ctx: &ExecutionContext,
        payload: &NewFeeStructure,
    ) -> RemoteResult<FeeStructure>;

    fn create_fee_allocation(
        &mut self,
        ctx: &ExecutionContext,
        payload: &NewFeeAllocation,
    ) -> RemoteResult<FeeAllocation>;

    /// replaces the allocation's plan wholesale
    fn create_installment_plan(
        &mut self,
        ctx: &ExecutionContext,
        student_id: StudentId,
        payload: &InstallmentPlan,
    ) -> RemoteResult<InstallmentPlan>;

    fn get_fee_discounts(
        &self,
        ctx: &ExecutionContext,
        scope: DiscountScope,
        scope_id: Uuid,
    ) -> RemoteResult<Vec<DiscountRule>>;

    fn create_fee_discount(
        &mut self,
        ctx: &ExecutionContext,
        payload: &NewDiscountRule,
    ) -> RemoteResult<DiscountRule>;

    fn delete_fee_discount(&mut self, ctx: &ExecutionContext, id: DiscountId) -> RemoteResult<()>;

    fn record_payment(
        &mut self,
        ctx: &ExecutionContext,
        allocation_id: AllocationId,
        payload: &PaymentRecord,
    ) -> RemoteResult<PaymentRecord>;

    fn get_payments(
        &self,
        ctx: &ExecutionContext,
        allocation_id: AllocationId,
    ) -> RemoteResult<Vec<PaymentRecord>>;

    fn initiate_refund(
        &mut self,
        ctx: &ExecutionContext,
        payment_id: PaymentId,
        payload: &PaymentRecord,
    ) -> RemoteResult<PaymentRecord>;

    fn enroll(&mut self, ctx: &ExecutionContext, payload: &Enrollment) -> RemoteResult<Enrollment>;

    fn unenroll(
        &mut self,
        ctx: &ExecutionContext,
        batch_id: BatchId,
        student_id: StudentId,
    ) -> RemoteResult<()>;

    fn get_enrollments(
        &self,
        ctx: &ExecutionContext,
        batch_id: BatchId,
    ) -> RemoteResult<Vec<Enrollment>>;
}
