use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{FeeError, Result};
use crate::types::{AllocationStatus, PaymentId};

use super::{derive_status, AllocationBalance, PaymentKind, PaymentRecord};

/// negative ledger entry plus the paid totals around it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundOutcome {
    pub record: PaymentRecord,
    pub paid_before: Money,
    pub paid_after: Money,
    pub status_after: AllocationStatus,
    /// set when the ledger would have gone below zero and was clamped
    pub anomaly: Option<String>,
}

/// plans refunds and reversals against an allocation's ledger
pub struct RefundPlanner;

impl RefundPlanner {
    /// amount of `payment_id` not yet refunded
    pub fn refundable(records: &[PaymentRecord], payment_id: PaymentId) -> Result<Money> {
        let original = Self::original(records, payment_id)?;
        let adjusted: Money = records
            .iter()
            .filter(|r| r.adjusts() == Some(payment_id))
            .map(|r| r.amount)
            .sum();
        Ok((original.amount + adjusted).non_negative())
    }

    /// partial or full refund of one payment
    pub fn refund(
        balance: &AllocationBalance,
        records: &[PaymentRecord],
        payment_id: PaymentId,
        amount: Money,
        date: NaiveDate,
        reference: String,
    ) -> Result<RefundOutcome> {
        if !amount.is_positive() {
            return Err(FeeError::InvalidAmount { amount });
        }
        let original = Self::original(records, payment_id)?;
        Self::ensure_not_reversed(records, payment_id)?;
        let available = Self::refundable(records, payment_id)?;
        if amount > available {
            return Err(FeeError::RefundExceedsPayment {
                payment_id,
                available,
                requested: amount,
            });
        }

        let record = PaymentRecord {
            id: Uuid::new_v4(),
            allocation_id: original.allocation_id,
            amount: -amount,
            date,
            mode: original.mode,
            reference,
            kind: PaymentKind::Refund { of: payment_id },
        };
        Ok(Self::outcome(balance, record, amount))
    }

    /// refund everything still standing on one payment
    pub fn reverse(
        balance: &AllocationBalance,
        records: &[PaymentRecord],
        payment_id: PaymentId,
        date: NaiveDate,
        reference: String,
    ) -> Result<RefundOutcome> {
        let original = Self::original(records, payment_id)?;
        Self::ensure_not_reversed(records, payment_id)?;
        let amount = Self::refundable(records, payment_id)?;
        if amount.is_zero() {
            return Err(FeeError::AlreadyReversed { id: payment_id });
        }

        let record = PaymentRecord {
            id: Uuid::new_v4(),
            allocation_id: original.allocation_id,
            amount: -amount,
            date,
            mode: original.mode,
            reference,
            kind: PaymentKind::Reversal { of: payment_id },
        };
        Ok(Self::outcome(balance, record, amount))
    }

    fn original(records: &[PaymentRecord], payment_id: PaymentId) -> Result<&PaymentRecord> {
        records
            .iter()
            .find(|r| r.id == payment_id && r.kind == PaymentKind::Payment)
            .ok_or(FeeError::PaymentNotFound { id: payment_id })
    }

    fn ensure_not_reversed(records: &[PaymentRecord], payment_id: PaymentId) -> Result<()> {
        let reversed = records
            .iter()
            .any(|r| r.kind == PaymentKind::Reversal { of: payment_id });
        if reversed {
            return Err(FeeError::AlreadyReversed { id: payment_id });
        }
        Ok(())
    }

    fn outcome(balance: &AllocationBalance, record: PaymentRecord, amount: Money) -> RefundOutcome {
        let paid_before = balance.paid.amount;
        let raw_after = balance.paid.raw - amount;
        let anomaly = if raw_after.is_negative() {
            warn!(
                allocation_id = %balance.allocation_id,
                raw_total = %raw_after,
                "refund would drive paid total negative, clamping at zero"
            );
            Some(format!(
                "paid total for allocation {} would be {} after refunding {}; clamped at 0",
                balance.allocation_id, raw_after, amount
            ))
        } else {
            None
        };
        let paid_after = raw_after.non_negative();

        RefundOutcome {
            record,
            paid_before,
            paid_after,
            status_after: derive_status(paid_after, balance.payable),
            anomaly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PaymentMode;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 8, 15).unwrap()
    }

    fn payment(allocation_id: Uuid, amount: i64) -> PaymentRecord {
        PaymentRecord {
            id: Uuid::new_v4(),
            allocation_id,
            amount: Money::from_major(amount),
            date: date(),
            mode: PaymentMode::Cash,
            reference: format!("R-{amount}"),
            kind: PaymentKind::Payment,
        }
    }

    #[test]
    fn test_partial_refund_then_reversal() {
        let allocation = Uuid::new_v4();
        let first = payment(allocation, 6_000);
        let mut records = vec![first.clone(), payment(allocation, 4_000)];
        let payable = Money::from_major(10_000);

        let balance = AllocationBalance::new(allocation, payable, &records);
        let refund = RefundPlanner::refund(
            &balance,
            &records,
            first.id,
            Money::from_major(1_000),
            date(),
            "RF-1".to_string(),
        )
        .unwrap();
        assert_eq!(refund.record.amount, Money::from_major(-1_000));
        assert_eq!(refund.paid_before, payable);
        assert_eq!(refund.paid_after, Money::from_major(9_000));
        assert_eq!(refund.status_after, AllocationStatus::Partial);
        assert!(refund.anomaly.is_none());
        records.push(refund.record);

        let balance = AllocationBalance::new(allocation, payable, &records);
        let reversal =
            RefundPlanner::reverse(&balance, &records, first.id, date(), "RV-1".to_string()).unwrap();
        assert_eq!(reversal.record.amount, Money::from_major(-5_000));
        assert_eq!(reversal.paid_after, Money::from_major(4_000));
        records.push(reversal.record);

        let balance = AllocationBalance::new(allocation, payable, &records);
        assert!(matches!(
            RefundPlanner::reverse(&balance, &records, first.id, date(), "RV-2".to_string()),
            Err(FeeError::AlreadyReversed { .. })
        ));
    }

    #[test]
    fn test_refund_bounded_by_payment() {
        let allocation = Uuid::new_v4();
        let only = payment(allocation, 500);
        let records = vec![only.clone()];
        let balance = AllocationBalance::new(allocation, Money::from_major(1_000), &records);

        let err = RefundPlanner::refund(
            &balance,
            &records,
            only.id,
            Money::from_major(600),
            date(),
            "RF".to_string(),
        )
        .unwrap_err();
        assert!(matches!(err, FeeError::RefundExceedsPayment { .. }));

        assert!(matches!(
            RefundPlanner::refund(&balance, &records, Uuid::new_v4(), Money::ONE, date(), "RF".to_string()),
            Err(FeeError::PaymentNotFound { .. })
        ));
    }

    #[test]
    fn test_negative_total_is_clamped_and_flagged() {
        let allocation = Uuid::new_v4();
        let original = payment(allocation, 1_000);
        // a stray backend adjustment not tied to any payment
        let mut stray = payment(allocation, -800);
        stray.kind = PaymentKind::Refund { of: Uuid::new_v4() };
        let records = vec![original.clone(), stray];
        let balance = AllocationBalance::new(allocation, Money::from_major(1_000), &records);

        let outcome =
            RefundPlanner::reverse(&balance, &records, original.id, date(), "RV".to_string()).unwrap();
        assert_eq!(outcome.paid_after, Money::ZERO);
        assert_eq!(outcome.status_after, AllocationStatus::Pending);
        assert!(outcome.anomaly.unwrap().contains("clamped at 0"));
    }
}
