use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::InstallmentStatus;

use super::Installment;

/// derived view of one installment after applying the paid total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentState {
    pub installment: Installment,
    pub status: InstallmentStatus,
    pub paid_portion: Money,
    pub due_portion: Money,
}

/// outcome of a waterfall pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterfallResult {
    pub states: Vec<InstallmentState>,
    /// amount absorbed by the schedule
    pub applied: Money,
    /// paid beyond the schedule total
    pub unapplied: Money,
}

impl WaterfallResult {
    pub fn count(&self, status: InstallmentStatus) -> usize {
        self.states.iter().filter(|s| s.status == status).count()
    }

    pub fn total_due(&self) -> Money {
        self.states.iter().map(|s| s.due_portion).sum()
    }

    /// first installment not fully covered
    pub fn next_due(&self) -> Option<&InstallmentState> {
        self.states.iter().find(|s| s.status != InstallmentStatus::Paid)
    }

    pub fn statuses(&self) -> Vec<InstallmentStatus> {
        self.states.iter().map(|s| s.status).collect()
    }
}

/// fills installments in schedule order, each one completely before the next
///
/// Read-side only. Recompute on every query; the paid total changes whenever a payment
/// or refund is recorded, independently of the saved schedule.
pub struct InstallmentWaterfall;

impl InstallmentWaterfall {
    pub fn apply(installments: &[Installment], total_paid: Money) -> WaterfallResult {
        let mut running = total_paid.non_negative();
        let mut applied = Money::ZERO;
        let mut states = Vec::with_capacity(installments.len());

        for installment in installments {
            let amount = installment.amount.non_negative();
            let (status, paid_portion) = if running >= amount {
                (InstallmentStatus::Paid, amount)
            } else if running.is_positive() {
                (InstallmentStatus::Partial, running)
            } else {
                (InstallmentStatus::Pending, Money::ZERO)
            };
            running -= paid_portion;
            applied += paid_portion;

            states.push(InstallmentState {
                installment: installment.clone(),
                status,
                paid_portion,
                due_portion: (amount - paid_portion).non_negative(),
            });
        }

        WaterfallResult {
            states,
            applied,
            unapplied: running,
        }
    }
}
