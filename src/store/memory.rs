use std::collections::HashMap;
use uuid::Uuid;

use crate::allocation::{FeeAllocation, FeeStructure, NewFeeAllocation, NewFeeStructure, StudentFeeRecord};
use crate::context::ExecutionContext;
use crate::decimal::Money;
use crate::discounts::{DiscountRule, NewDiscountRule};
use crate::enrollment::Enrollment;
use crate::payments::{InstallmentPlan, PaymentRecord};
use crate::types::{AllocationId, BatchId, CourseId, DiscountId, DiscountScope, EnrollmentStatus, PaymentId, StudentId};

use super::backend::{CatalogEntry, FeeBackend, RemoteError, RemoteResult};

/// in-process system of record with failure injection
///
/// Failures are keyed by the trait method name, e.g. `"get_fee_discounts"`.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    courses: Vec<CatalogEntry>,
    batches: HashMap<CourseId, Vec<CatalogEntry>>,
    students: HashMap<BatchId, Vec<CatalogEntry>>,
    structures: Vec<FeeStructure>,
    fee_records: Vec<StudentFeeRecord>,
    discounts: Vec<DiscountRule>,
    payments: Vec<PaymentRecord>,
    enrollments: Vec<Enrollment>,
    failures: HashMap<&'static str, RemoteError>,
    offline: Option<RemoteError>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_course(&mut self, name: &str, base_fee: Option<Money>) -> CourseId {
        let id = Uuid::new_v4();
        self.courses.push(CatalogEntry {
            id,
            name: name.to_string(),
            amount: base_fee,
        });
        id
    }

    pub fn add_batch(&mut self, course_id: CourseId, name: &str) -> BatchId {
        let id = Uuid::new_v4();
        self.batches.entry(course_id).or_default().push(CatalogEntry {
            id,
            name: name.to_string(),
            amount: None,
        });
        id
    }

    pub fn add_student(&mut self, batch_id: BatchId, name: &str) -> StudentId {
        let id = Uuid::new_v4();
        self.students.entry(batch_id).or_default().push(CatalogEntry {
            id,
            name: name.to_string(),
            amount: None,
        });
        id
    }

    pub fn insert_fee_record(&mut self, record: StudentFeeRecord) {
        self.fee_records.push(record);
    }

    pub fn insert_discount(&mut self, rule: DiscountRule) {
        self.discounts.push(rule);
    }

    pub fn fee_records_for(&self, student_id: StudentId) -> Vec<StudentFeeRecord> {
        self.fee_records
            .iter()
            .filter(|r| r.student_id == student_id)
            .cloned()
            .collect()
    }

    pub fn structure_count(&self) -> usize {
        self.structures.len()
    }

    pub fn payment_count(&self) -> usize {
        self.payments.len()
    }

    pub fn enrollment_count(&self) -> usize {
        self.enrollments.len()
    }

    /// make one operation fail until cleared
    pub fn fail(&mut self, operation: &'static str, error: RemoteError) {
        self.failures.insert(operation, error);
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    /// make every operation fail with `error`
    pub fn go_offline(&mut self, error: RemoteError) {
        self.offline = Some(error);
    }

    pub fn go_online(&mut self) {
        self.offline = None;
    }

    fn check(&self, operation: &'static str) -> RemoteResult<()> {
        if let Some(err) = &self.offline {
            return Err(err.clone());
        }
        match self.failures.get(operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn allocation_exists(&self, allocation_id: AllocationId) -> bool {
        self.fee_records.iter().any(|r| r.id == allocation_id)
    }
}

impl FeeBackend for InMemoryBackend {
    fn get_courses(&self, _ctx: &ExecutionContext) -> RemoteResult<Vec<CatalogEntry>> {
        self.check("get_courses")?;
        Ok(self.courses.clone())
    }

    fn get_batches_by_course(
        &self,
        _ctx: &ExecutionContext,
        course_id: CourseId,
    ) -> RemoteResult<Vec<CatalogEntry>> {
        self.check("get_batches_by_course")?;
        Ok(self.batches.get(&course_id).cloned().unwrap_or_default())
    }

    fn get_students_by_batch(
        &self,
        _ctx: &ExecutionContext,
        batch_id: BatchId,
    ) -> RemoteResult<Vec<CatalogEntry>> {
        self.check("get_students_by_batch")?;
        Ok(self.students.get(&batch_id).cloned().unwrap_or_default())
    }

    fn get_fee_allocations_for_student(
        &self,
        _ctx: &ExecutionContext,
        student_id: StudentId,
    ) -> RemoteResult<Vec<StudentFeeRecord>> {
        self.check("get_fee_allocations_for_student")?;
        Ok(self.fee_records_for(student_id))
    }

    fn create_fee_structure(
        &mut self,
        _ctx: &ExecutionContext,
        payload: &NewFeeStructure,
    ) -> RemoteResult<FeeStructure> {
        self.check("create_fee_structure")?;
        let structure = FeeStructure {
            id: Uuid::new_v4(),
            name: payload.name.clone(),
            course_id: payload.course_id,
            batch_id: payload.batch_id,
            total_amount: payload.total_amount,
            currency: payload.currency.clone(),
            is_active: payload.is_active,
        };
        self.structures.push(structure.clone());
        Ok(structure)
    }

    fn create_fee_allocation(
        &mut self,
        _ctx: &ExecutionContext,
        payload: &NewFeeAllocation,
    ) -> RemoteResult<FeeAllocation> {
        self.check("create_fee_allocation")?;
        if !self.structures.iter().any(|s| s.id == payload.fee_structure_id) {
            return Err(RemoteError::not_found(format!("fee structure {}", payload.fee_structure_id)));
        }
        let allocation = FeeAllocation {
            id: Uuid::new_v4(),
            student_id: payload.student_id,
            fee_structure_id: payload.fee_structure_id,
            original_amount: payload.original_amount,
            payable_amount: payload.payable_amount,
            total_discount: payload.total_discount,
            total_surcharge: payload.total_surcharge,
        };
        self.fee_records.push(StudentFeeRecord::from_allocation(&allocation));
        Ok(allocation)
    }

    fn create_installment_plan(
        &mut self,
        _ctx: &ExecutionContext,
        student_id: StudentId,
        payload: &InstallmentPlan,
    ) -> RemoteResult<InstallmentPlan> {
        self.check("create_installment_plan")?;
        let record = self
            .fee_records
            .iter_mut()
            .find(|r| r.id == payload.allocation_id && r.student_id == student_id)
            .ok_or_else(|| RemoteError::not_found(format!("allocation {}", payload.allocation_id)))?;
        record.installments = payload.installments.clone();
        record.plan_type = Some(payload.plan_type);
        Ok(payload.clone())
    }

    fn get_fee_discounts(
        &self,
        _ctx: &ExecutionContext,
        scope: DiscountScope,
        scope_id: Uuid,
    ) -> RemoteResult<Vec<DiscountRule>> {
        self.check("get_fee_discounts")?;
        Ok(self
            .discounts
            .iter()
            .filter(|d| d.scope == scope && d.scope_id == scope_id)
            .cloned()
            .collect())
    }

    fn create_fee_discount(
        &mut self,
        _ctx: &ExecutionContext,
        payload: &NewDiscountRule,
    ) -> RemoteResult<DiscountRule> {
        self.check("create_fee_discount")?;
        let rule = DiscountRule {
            id: Uuid::new_v4(),
            fee_structure_id: payload.fee_structure_id,
            scope: payload.scope,
            scope_id: payload.scope_id,
            discount_type: payload.discount_type,
            value: payload.value,
            admission_fee: payload.admission_fee,
            is_active: true,
        };
        self.discounts.push(rule.clone());
        Ok(rule)
    }

    fn delete_fee_discount(&mut self, _ctx: &ExecutionContext, id: DiscountId) -> RemoteResult<()> {
        self.check("delete_fee_discount")?;
        let before = self.discounts.len();
        self.discounts.retain(|d| d.id != id);
        if self.discounts.len() == before {
            return Err(RemoteError::not_found(format!("discount {id}")));
        }
        Ok(())
    }

    fn record_payment(
        &mut self,
        _ctx: &ExecutionContext,
        allocation_id: AllocationId,
        payload: &PaymentRecord,
    ) -> RemoteResult<PaymentRecord> {
        self.check("record_payment")?;
        if !self.allocation_exists(allocation_id) {
            return Err(RemoteError::not_found(format!("allocation {allocation_id}")));
        }
        let duplicate = self
            .payments
            .iter()
            .any(|p| p.allocation_id == allocation_id && p.reference == payload.reference);
        if duplicate {
            return Err(RemoteError::conflict(format!(
                "reference {} already recorded",
                payload.reference
            )));
        }
        let record = PaymentRecord {
            allocation_id,
            ..payload.clone()
        };
        self.payments.push(record.clone());
        Ok(record)
    }

    fn get_payments(
        &self,
        _ctx: &ExecutionContext,
        allocation_id: AllocationId,
    ) -> RemoteResult<Vec<PaymentRecord>> {
        self.check("get_payments")?;
        Ok(self
            .payments
            .iter()
            .filter(|p| p.allocation_id == allocation_id)
            .cloned()
            .collect())
    }

    fn initiate_refund(
        &mut self,
        _ctx: &ExecutionContext,
        payment_id: PaymentId,
        payload: &PaymentRecord,
    ) -> RemoteResult<PaymentRecord> {
        self.check("initiate_refund")?;
        if !self.payments.iter().any(|p| p.id == payment_id) {
            return Err(RemoteError::not_found(format!("payment {payment_id}")));
        }
        self.payments.push(payload.clone());
        Ok(payload.clone())
    }

    fn enroll(&mut self, _ctx: &ExecutionContext, payload: &Enrollment) -> RemoteResult<Enrollment> {
        self.check("enroll")?;
        let existing = self
            .enrollments
            .iter_mut()
            .find(|e| e.batch_id == payload.batch_id && e.student_id == payload.student_id);
        match existing {
            Some(enrollment) => {
                enrollment.status = EnrollmentStatus::Active;
                Ok(enrollment.clone())
            }
            None => {
                self.enrollments.push(payload.clone());
                Ok(payload.clone())
            }
        }
    }

    fn unenroll(
        &mut self,
        _ctx: &ExecutionContext,
        batch_id: BatchId,
        student_id: StudentId,
    ) -> RemoteResult<()> {
        self.check("unenroll")?;
        let enrollment = self
            .enrollments
            .iter_mut()
            .find(|e| e.batch_id == batch_id && e.student_id == student_id)
            .ok_or_else(|| RemoteError::not_found(format!("enrollment of {student_id} in {batch_id}")))?;
        enrollment.status = EnrollmentStatus::Withdrawn;
        Ok(())
    }

    fn get_enrollments(
        &self,
        _ctx: &ExecutionContext,
        batch_id: BatchId,
    ) -> RemoteResult<Vec<Enrollment>> {
        self.check("get_enrollments")?;
        Ok(self
            .enrollments
            .iter()
            .filter(|e| e.batch_id == batch_id)
            .cloned()
            .collect())
    }
}
