use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::store::Origin;
use crate::types::{
    AllocationId, AllocationStatus, BatchId, CourseId, DiscountId, DiscountScope, FeeStructureId,
    PaymentId, PlanType, StudentId,
};

/// audit trail of everything the fee desk did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // allocation events
    AllocationMatched {
        student_id: StudentId,
        allocation_id: AllocationId,
        expected_amount: Money,
        payable_amount: Money,
        operator: Uuid,
        timestamp: DateTime<Utc>,
    },
    DiscountLookupDegraded {
        student_id: StudentId,
        reason: String,
        operator: Uuid,
        timestamp: DateTime<Utc>,
    },
    FeeStructureCreated {
        structure_id: FeeStructureId,
        course_id: CourseId,
        total_amount: Money,
        operator: Uuid,
        timestamp: DateTime<Utc>,
    },
    AllocationCreated {
        allocation_id: AllocationId,
        student_id: StudentId,
        original_amount: Money,
        total_discount: Money,
        total_surcharge: Money,
        payable_amount: Money,
        discount_rule: Option<DiscountId>,
        operator: Uuid,
        timestamp: DateTime<Utc>,
    },
    /// a backend-reported record kept locally because the backend write path failed
    AllocationParked {
        student_id: StudentId,
        allocation_id: AllocationId,
        payable_amount: Money,
        operator: Uuid,
        timestamp: DateTime<Utc>,
    },

    // schedule events
    InstallmentPlanSaved {
        student_id: StudentId,
        allocation_id: AllocationId,
        plan_type: PlanType,
        installments: usize,
        total: Money,
        origin: Origin,
        operator: Uuid,
        timestamp: DateTime<Utc>,
    },

    // payment events
    PaymentRecorded {
        payment_id: PaymentId,
        allocation_id: AllocationId,
        amount: Money,
        date: NaiveDate,
        reference: String,
        status_after: AllocationStatus,
        origin: Origin,
        operator: Uuid,
        timestamp: DateTime<Utc>,
    },
    RefundIssued {
        refund_id: PaymentId,
        payment_id: PaymentId,
        allocation_id: AllocationId,
        amount: Money,
        status_after: AllocationStatus,
        operator: Uuid,
        timestamp: DateTime<Utc>,
    },
    PaymentReversed {
        reversal_id: PaymentId,
        payment_id: PaymentId,
        allocation_id: AllocationId,
        amount: Money,
        status_after: AllocationStatus,
        operator: Uuid,
        timestamp: DateTime<Utc>,
    },
    PaidTotalClamped {
        allocation_id: AllocationId,
        raw_total: Money,
        detail: String,
        timestamp: DateTime<Utc>,
    },

    // enrollment events
    Enrolled {
        batch_id: BatchId,
        student_id: StudentId,
        origin: Origin,
        operator: Uuid,
        timestamp: DateTime<Utc>,
    },
    Unenrolled {
        batch_id: BatchId,
        student_id: StudentId,
        origin: Origin,
        operator: Uuid,
        timestamp: DateTime<Utc>,
    },

    // discount management
    DiscountCreated {
        discount_id: DiscountId,
        scope: DiscountScope,
        scope_id: Uuid,
        operator: Uuid,
        timestamp: DateTime<Utc>,
    },
    DiscountDeleted {
        discount_id: DiscountId,
        operator: Uuid,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
