pub mod allocation;
pub mod config;
pub mod context;
pub mod decimal;
pub mod desk;
pub mod discounts;
pub mod enrollment;
pub mod errors;
pub mod events;
pub mod payments;
pub mod store;
pub mod types;
pub mod views;

// re-export key types
pub use allocation::{
    AllocationPlan, AllocationProposal, AllocationRequest, AllocationResolver, Confirmation,
    CreatedAllocation, FeeAllocation, FeeStructure, FeeWarning, Resolution, StudentFeeRecord,
};
pub use config::{DiscountFailurePolicy, FallbackConfig, FeeConfig, ToleranceConfig};
pub use context::{Credentials, ExecutionContext, Operator};
pub use decimal::{Money, Rate};
pub use desk::{Admission, AdmissionRequest, AllocationStep, FeeDesk, PaymentReceipt};
pub use discounts::{apply_discount, AppliedDiscount, DiscountLookup, DiscountResolver, DiscountRule, NewDiscountRule};
pub use enrollment::Enrollment;
pub use errors::{FeeError, Result};
pub use events::{Event, EventStore};
pub use payments::{
    AllocationBalance, Installment, InstallmentPlan, InstallmentState, InstallmentWaterfall,
    PaymentInput, PaymentKind, PaymentRecord, RefundOutcome, RefundPlanner, ScheduleBuilder,
    ScheduleDraft, WaterfallResult,
};
pub use store::{
    CacheRecord, CatalogEntry, DualSource, FallbackCache, FeeBackend, InMemoryBackend,
    JsonFileCache, LocalCache, MemoryCache, Origin, Persisted, RemoteError, RemoteResult,
    WritePolicy,
};
pub use types::{
    AllocationId, AllocationStatus, BatchId, CourseId, DiscountId, DiscountScope, DiscountType,
    EnrollmentStatus, FeeStructureId, InstallmentStatus, PaymentId, PaymentMode, PlanType,
    StudentId,
};
pub use views::AllocationStatement;

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
