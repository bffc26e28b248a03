//! serializable statement views

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::allocation::StudentFeeRecord;
use crate::decimal::Money;
use crate::errors::Result;
use crate::payments::{
    AllocationBalance, Installment, InstallmentWaterfall, PaymentKind, PaymentRecord,
};
use crate::store::{Origin, Persisted};
use crate::types::{
    AllocationId, AllocationStatus, InstallmentStatus, PaymentId, PaymentMode, PlanType, StudentId,
};

/// one allocation with its derived installment states and ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationStatement {
    pub allocation_id: AllocationId,
    pub student_id: StudentId,
    pub allocation_origin: Origin,
    pub amounts: AmountView,
    pub plan: Option<PlanView>,
    pub payments: Vec<PaymentLine>,
    pub balance: BalanceView,
    pub anomalies: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountView {
    pub total_amount: Money,
    pub total_discount: Money,
    pub total_surcharge: Money,
    pub payable_amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanView {
    pub plan_type: Option<PlanType>,
    pub origin: Origin,
    pub total: Money,
    pub installments: Vec<InstallmentLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentLine {
    pub name: String,
    pub amount: Money,
    pub due_date: Option<NaiveDate>,
    pub status: InstallmentStatus,
    pub paid: Money,
    pub due: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLine {
    pub id: PaymentId,
    pub amount: Money,
    pub date: NaiveDate,
    pub mode: PaymentMode,
    pub reference: String,
    #[serde(flatten)]
    pub kind: PaymentKind,
    pub origin: Origin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceView {
    pub total_paid: Money,
    pub pending: Money,
    pub excess_paid: Money,
    pub status: AllocationStatus,
}

/// installments to project, with where they were read from
#[derive(Debug, Clone, PartialEq)]
pub struct PlanSource {
    pub plan_type: Option<PlanType>,
    pub installments: Vec<Installment>,
    pub origin: Origin,
}

impl AllocationStatement {
    pub fn build(
        record: &Persisted<StudentFeeRecord>,
        plan: Option<PlanSource>,
        payments: &[Persisted<PaymentRecord>],
        schedule_tolerance: Money,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let fee = &record.record;
        let ledger: Vec<PaymentRecord> = payments.iter().map(|p| p.record.clone()).collect();
        let balance = AllocationBalance::new(fee.id, fee.payable_amount, &ledger);

        let mut anomalies = Vec::new();
        if balance.paid.is_clamped() {
            anomalies.push(format!(
                "ledger sums to {}; paid total clamped at 0",
                balance.paid.raw
            ));
        }
        if balance.excess_paid().is_positive() {
            anomalies.push(format!(
                "paid {} exceeds payable {} by {}",
                balance.total_paid(),
                balance.payable,
                balance.excess_paid()
            ));
        }

        let plan = plan.filter(|p| !p.installments.is_empty()).map(|source| {
            let total: Money = source.installments.iter().map(|i| i.amount).sum();
            if !total.within(fee.payable_amount, schedule_tolerance) {
                anomalies.push(format!(
                    "installments sum to {} but payable is {}",
                    total, fee.payable_amount
                ));
            }
            let projected = InstallmentWaterfall::apply(&source.installments, balance.total_paid());
            PlanView {
                plan_type: source.plan_type,
                origin: source.origin,
                total,
                installments: projected
                    .states
                    .into_iter()
                    .map(|state| InstallmentLine {
                        name: state.installment.name,
                        amount: state.installment.amount,
                        due_date: state.installment.due_date,
                        status: state.status,
                        paid: state.paid_portion,
                        due: state.due_portion,
                    })
                    .collect(),
            }
        });

        Self {
            allocation_id: fee.id,
            student_id: fee.student_id,
            allocation_origin: record.origin,
            amounts: AmountView {
                total_amount: fee.total_amount,
                total_discount: fee.total_discount,
                total_surcharge: fee.total_surcharge,
                payable_amount: fee.payable_amount,
            },
            plan,
            payments: payments
                .iter()
                .map(|p| PaymentLine {
                    id: p.record.id,
                    amount: p.record.amount,
                    date: p.record.date,
                    mode: p.record.mode,
                    reference: p.record.reference.clone(),
                    kind: p.record.kind,
                    origin: p.origin,
                })
                .collect(),
            balance: BalanceView {
                total_paid: balance.total_paid(),
                pending: balance.pending(),
                excess_paid: balance.excess_paid(),
                status: balance.status(),
            },
            anomalies,
            generated_at,
        }
    }

    /// entries the backend has not acknowledged yet
    pub fn unsynced_count(&self) -> usize {
        let plan = self
            .plan
            .as_ref()
            .map_or(0, |p| usize::from(p.origin == Origin::Fallback));
        let payments = self.payments.iter().filter(|p| p.origin == Origin::Fallback).count();
        usize::from(self.allocation_origin == Origin::Fallback) + plan + payments
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
