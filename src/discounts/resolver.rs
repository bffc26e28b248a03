use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::errors::{FeeError, Result};
use crate::store::{FeeBackend, RemoteError};
use crate::types::{BatchId, DiscountScope, StudentId};

use super::DiscountRule;

/// outcome of a scoped discount lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiscountLookup {
    Found(DiscountRule),
    NoDiscount,
    /// the backend could not be reached; no discount was applied
    Degraded { reason: String },
}

impl DiscountLookup {
    pub fn rule(&self) -> Option<&DiscountRule> {
        match self {
            DiscountLookup::Found(rule) => Some(rule),
            _ => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, DiscountLookup::Degraded { .. })
    }
}

/// resolves the single discount rule for a student, student scope first
pub struct DiscountResolver;

impl DiscountResolver {
    pub fn resolve<B: FeeBackend>(
        backend: &B,
        ctx: &ExecutionContext,
        student_id: StudentId,
        batch_id: Option<BatchId>,
    ) -> Result<DiscountLookup> {
        match Self::first_active(backend, ctx, DiscountScope::Student, student_id) {
            Ok(Some(rule)) => {
                debug!(%student_id, rule_id = %rule.id, "student-scoped discount found");
                return Ok(DiscountLookup::Found(rule));
            }
            Ok(None) => {}
            Err(err) => return Self::degrade(student_id, err),
        }

        let Some(batch_id) = batch_id else {
            return Ok(DiscountLookup::NoDiscount);
        };

        match Self::first_active(backend, ctx, DiscountScope::Batch, batch_id) {
            Ok(Some(rule)) => {
                debug!(%student_id, %batch_id, rule_id = %rule.id, "batch-scoped discount found");
                Ok(DiscountLookup::Found(rule))
            }
            Ok(None) => Ok(DiscountLookup::NoDiscount),
            Err(err) => Self::degrade(student_id, err),
        }
    }

    fn first_active<B: FeeBackend>(
        backend: &B,
        ctx: &ExecutionContext,
        scope: DiscountScope,
        scope_id: uuid::Uuid,
    ) -> std::result::Result<Option<DiscountRule>, RemoteError> {
        let rules = backend.get_fee_discounts(ctx, scope, scope_id)?;
        Ok(rules
            .into_iter()
            .find(|rule| rule.is_active && rule.scope == scope && rule.scope_id == scope_id))
    }

    fn degrade(student_id: StudentId, err: RemoteError) -> Result<DiscountLookup> {
        if !err.is_transport() {
            return Err(FeeError::remote("discount lookup", err));
        }
        warn!(%student_id, error = %err, "discount lookup failed, continuing without discount");
        Ok(DiscountLookup::Degraded {
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Credentials, Operator};
    use crate::decimal::Money;
    use crate::discounts::apply_discount;
    use crate::store::InMemoryBackend;
    use crate::types::DiscountType;
    use chrono::Utc;
    use hourglass_rs::{SafeTimeProvider, TimeSource};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(
            Operator { id: Uuid::new_v4(), name: "desk".to_string() },
            Credentials::bearer("t"),
            SafeTimeProvider::new(TimeSource::Test(Utc::now())),
        )
    }

    fn rule(scope: DiscountScope, scope_id: Uuid, value: rust_decimal::Decimal) -> DiscountRule {
        DiscountRule {
            id: Uuid::new_v4(),
            fee_structure_id: None,
            scope,
            scope_id,
            discount_type: DiscountType::Flat,
            value,
            admission_fee: Money::ZERO,
            is_active: true,
        }
    }

    #[test]
    fn test_student_rule_takes_precedence() {
        let ctx = ctx();
        let mut backend = InMemoryBackend::new();
        let student = Uuid::new_v4();
        let batch = Uuid::new_v4();
        backend.insert_discount(rule(DiscountScope::Batch, batch, dec!(1000)));
        let student_rule = rule(DiscountScope::Student, student, dec!(3000));
        backend.insert_discount(student_rule.clone());

        let lookup = DiscountResolver::resolve(&backend, &ctx, student, Some(batch)).unwrap();
        assert_eq!(lookup, DiscountLookup::Found(student_rule));
    }

    #[test]
    fn test_batch_rule_when_no_student_rule() {
        let ctx = ctx();
        let mut backend = InMemoryBackend::new();
        let batch = Uuid::new_v4();
        let mut inactive = rule(DiscountScope::Batch, batch, dec!(9000));
        inactive.is_active = false;
        backend.insert_discount(inactive);
        let batch_rule = rule(DiscountScope::Batch, batch, dec!(1000));
        backend.insert_discount(batch_rule.clone());

        let lookup = DiscountResolver::resolve(&backend, &ctx, Uuid::new_v4(), Some(batch)).unwrap();
        assert_eq!(lookup.rule(), Some(&batch_rule));

        // rules never stack
        let applied = apply_discount(Money::from_major(10_000), lookup.rule());
        assert_eq!(applied.payable, Money::from_major(9_000));
    }

    #[test]
    fn test_no_batch_means_no_discount() {
        let ctx = ctx();
        let backend = InMemoryBackend::new();
        let lookup = DiscountResolver::resolve(&backend, &ctx, Uuid::new_v4(), None).unwrap();
        assert_eq!(lookup, DiscountLookup::NoDiscount);
    }

    #[test]
    fn test_transport_failure_degrades() {
        let ctx = ctx();
        let mut backend = InMemoryBackend::new();
        backend.fail("get_fee_discounts", RemoteError::Timeout { millis: 3_000 });

        let lookup = DiscountResolver::resolve(&backend, &ctx, Uuid::new_v4(), None).unwrap();
        assert!(lookup.is_degraded());
        assert!(lookup.rule().is_none());
    }

    #[test]
    fn test_rejection_is_surfaced() {
        let ctx = ctx();
        let mut backend = InMemoryBackend::new();
        backend.fail(
            "get_fee_discounts",
            RemoteError::Rejected { status: 403, message: "forbidden".to_string() },
        );

        let result = DiscountResolver::resolve(&backend, &ctx, Uuid::new_v4(), None);
        assert!(matches!(result, Err(FeeError::Rejected { status: 403, .. })));
    }
}
