pub mod resolver;

use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::payments::Installment;
use crate::store::CacheRecord;
use crate::types::{AllocationId, BatchId, CourseId, FeeStructureId, PlanType, StudentId};

pub use resolver::{
    AllocationPlan, AllocationProposal, AllocationRequest, AllocationResolver, Confirmation,
    CreatedAllocation, FeeWarning, Resolution,
};

/// course/batch-scoped fee template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeStructure {
    pub id: FeeStructureId,
    pub name: String,
    pub course_id: CourseId,
    pub batch_id: Option<BatchId>,
    pub total_amount: Money,
    pub currency: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFeeStructure {
    pub name: String,
    pub course_id: CourseId,
    pub batch_id: Option<BatchId>,
    pub total_amount: Money,
    pub currency: String,
    pub is_active: bool,
}

/// a fee structure bound to one student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeAllocation {
    pub id: AllocationId,
    pub student_id: StudentId,
    pub fee_structure_id: FeeStructureId,
    pub original_amount: Money,
    pub payable_amount: Money,
    pub total_discount: Money,
    #[serde(default)]
    pub total_surcharge: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFeeAllocation {
    pub student_id: StudentId,
    pub fee_structure_id: FeeStructureId,
    pub original_amount: Money,
    pub payable_amount: Money,
    pub total_discount: Money,
    pub total_surcharge: Money,
}

/// a student's fee record as the backend reports it: allocation plus its current plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentFeeRecord {
    pub id: AllocationId,
    pub student_id: StudentId,
    pub fee_structure_id: FeeStructureId,
    pub total_amount: Money,
    pub payable_amount: Money,
    #[serde(default)]
    pub total_discount: Money,
    #[serde(default)]
    pub total_surcharge: Money,
    #[serde(default)]
    pub installments: Vec<Installment>,
    pub plan_type: Option<PlanType>,
}

impl StudentFeeRecord {
    pub fn from_allocation(allocation: &FeeAllocation) -> Self {
        Self {
            id: allocation.id,
            student_id: allocation.student_id,
            fee_structure_id: allocation.fee_structure_id,
            total_amount: allocation.original_amount,
            payable_amount: allocation.payable_amount,
            total_discount: allocation.total_discount,
            total_surcharge: allocation.total_surcharge,
            installments: Vec::new(),
            plan_type: None,
        }
    }

    /// true when either the payable or the total amount is within `tolerance` of `expected`
    pub fn matches_amount(&self, expected: Money, tolerance: Money) -> bool {
        self.payable_amount.within(expected, tolerance) || self.total_amount.within(expected, tolerance)
    }

    pub fn has_plan(&self) -> bool {
        !self.installments.is_empty()
    }
}

impl CacheRecord for StudentFeeRecord {
    type Key = (StudentId, AllocationId);
    const COLLECTION: &'static str = "fee_records";

    fn natural_key(&self) -> Self::Key {
        (self.student_id, self.id)
    }
}
