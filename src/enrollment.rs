use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::CacheRecord;
use crate::types::{BatchId, EnrollmentStatus, StudentId};

/// a student's membership in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub batch_id: BatchId,
    pub student_id: StudentId,
    pub status: EnrollmentStatus,
    pub enrolled_at: DateTime<Utc>,
}

impl Enrollment {
    pub fn new(batch_id: BatchId, student_id: StudentId, enrolled_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id,
            student_id,
            status: EnrollmentStatus::Active,
            enrolled_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == EnrollmentStatus::Active
    }

    /// same record marked withdrawn
    pub fn withdrawn(&self) -> Self {
        Self {
            status: EnrollmentStatus::Withdrawn,
            ..self.clone()
        }
    }
}

impl CacheRecord for Enrollment {
    type Key = (BatchId, StudentId);
    const COLLECTION: &'static str = "enrollments";

    fn natural_key(&self) -> Self::Key {
        (self.batch_id, self.student_id)
    }
}
