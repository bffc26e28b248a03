pub mod refund;
pub mod schedule;
pub mod waterfall;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{FeeError, Result};
use crate::store::CacheRecord;
use crate::types::{AllocationId, AllocationStatus, PaymentId, PaymentMode};

pub use refund::{RefundOutcome, RefundPlanner};
pub use schedule::{Installment, InstallmentPlan, ScheduleBuilder, ScheduleDraft};
pub use waterfall::{InstallmentState, InstallmentWaterfall, WaterfallResult};

/// what a ledger entry represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentKind {
    Payment,
    /// partial or full refund of an earlier payment
    Refund { of: PaymentId },
    /// explicit reversal of an earlier payment
    Reversal { of: PaymentId },
}

/// append-only ledger entry; refunds and reversals carry negative amounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: PaymentId,
    pub allocation_id: AllocationId,
    pub amount: Money,
    pub date: NaiveDate,
    pub mode: PaymentMode,
    pub reference: String,
    #[serde(flatten)]
    pub kind: PaymentKind,
}

impl PaymentRecord {
    /// payment this entry adjusts, for refunds and reversals
    pub fn adjusts(&self) -> Option<PaymentId> {
        match self.kind {
            PaymentKind::Payment => None,
            PaymentKind::Refund { of } | PaymentKind::Reversal { of } => Some(of),
        }
    }
}

impl CacheRecord for PaymentRecord {
    type Key = (AllocationId, String);
    const COLLECTION: &'static str = "payments";

    fn natural_key(&self) -> Self::Key {
        (self.allocation_id, self.reference.clone())
    }
}

/// operator-entered payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInput {
    pub amount: Money,
    pub date: NaiveDate,
    pub mode: PaymentMode,
    /// receipt number; generated when empty
    pub reference: String,
}

/// sum of an allocation's ledger, clamped at zero
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaidTotal {
    pub amount: Money,
    pub raw: Money,
}

impl PaidTotal {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a PaymentRecord>) -> Self {
        let raw: Money = records.into_iter().map(|r| r.amount).sum();
        Self {
            amount: raw.non_negative(),
            raw,
        }
    }

    /// ledger sums below zero
    pub fn is_clamped(&self) -> bool {
        self.raw.is_negative()
    }
}

/// payable vs paid for one allocation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationBalance {
    pub allocation_id: AllocationId,
    pub payable: Money,
    pub paid: PaidTotal,
}

impl AllocationBalance {
    pub fn new(allocation_id: AllocationId, payable: Money, records: &[PaymentRecord]) -> Self {
        Self {
            allocation_id,
            payable,
            paid: PaidTotal::from_records(records),
        }
    }

    pub fn total_paid(&self) -> Money {
        self.paid.amount
    }

    /// what is still owed; never negative
    pub fn pending(&self) -> Money {
        (self.payable - self.paid.amount).non_negative()
    }

    /// paid beyond the payable amount
    pub fn excess_paid(&self) -> Money {
        (self.paid.amount - self.payable).non_negative()
    }

    pub fn status(&self) -> AllocationStatus {
        derive_status(self.paid.amount, self.payable)
    }

    /// `0 < amount <= pending`
    pub fn validate_payment(&self, amount: Money) -> Result<()> {
        if !amount.is_positive() {
            return Err(FeeError::InvalidAmount { amount });
        }
        let pending = self.pending();
        if amount > pending {
            return Err(FeeError::Overpayment {
                allocation_id: self.allocation_id,
                amount,
                pending,
            });
        }
        Ok(())
    }
}

pub fn derive_status(paid: Money, payable: Money) -> AllocationStatus {
    if !paid.is_positive() {
        AllocationStatus::Pending
    } else if paid < payable {
        AllocationStatus::Partial
    } else {
        AllocationStatus::Paid
    }
}

/// receipt reference for entries recorded without one
pub fn generate_reference(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &id[..12].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(amount: i64, kind: PaymentKind) -> PaymentRecord {
        PaymentRecord {
            id: Uuid::new_v4(),
            allocation_id: Uuid::nil(),
            amount: Money::from_major(amount),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            mode: PaymentMode::Upi,
            reference: generate_reference("RCPT"),
            kind,
        }
    }

    #[test]
    fn test_over_payment_rejected() {
        let balance = AllocationBalance::new(Uuid::nil(), Money::from_major(25_000), &[]);
        let err = balance.validate_payment(Money::from_major(30_000)).unwrap_err();
        assert!(matches!(
            err,
            FeeError::Overpayment { pending, .. } if pending == Money::from_major(25_000)
        ));
        assert!(balance.validate_payment(Money::from_major(25_000)).is_ok());
        assert!(balance.validate_payment(Money::ZERO).is_err());
        assert!(balance.validate_payment(Money::from_major(-5)).is_err());
    }

    #[test]
    fn test_status_derivation() {
        let payable = Money::from_major(1_000);
        assert_eq!(derive_status(Money::ZERO, payable), AllocationStatus::Pending);
        assert_eq!(derive_status(Money::from_major(1), payable), AllocationStatus::Partial);
        assert_eq!(derive_status(payable, payable), AllocationStatus::Paid);
        assert_eq!(derive_status(Money::from_major(1_200), payable), AllocationStatus::Paid);
    }

    #[test]
    fn test_existing_excess_is_tolerated() {
        let records = vec![record(800, PaymentKind::Payment), record(400, PaymentKind::Payment)];
        let balance = AllocationBalance::new(Uuid::nil(), Money::from_major(1_000), &records);

        assert_eq!(balance.excess_paid(), Money::from_major(200));
        assert_eq!(balance.pending(), Money::ZERO);
        assert!(balance.validate_payment(Money::ONE).is_err());
    }

    #[test]
    fn test_negative_ledger_is_clamped() {
        let original = record(100, PaymentKind::Payment);
        let refund = record(-150, PaymentKind::Refund { of: original.id });
        let paid = PaidTotal::from_records([&original, &refund]);

        assert_eq!(paid.amount, Money::ZERO);
        assert_eq!(paid.raw, Money::from_major(-50));
        assert!(paid.is_clamped());
        assert_eq!(refund.adjusts(), Some(original.id));
    }

    #[test]
    fn test_record_wire_format() {
        let entry = record(-10, PaymentKind::Reversal { of: Uuid::nil() });
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "REVERSAL");
        let back: PaymentRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}
