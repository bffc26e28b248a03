pub mod resolver;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::errors::{FeeError, Result};
use crate::types::{DiscountId, DiscountScope, DiscountType, FeeStructureId};

pub use resolver::{DiscountLookup, DiscountResolver};

fn active_by_default() -> bool {
    true
}

/// a discount scoped to one student or one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountRule {
    pub id: DiscountId,
    pub fee_structure_id: Option<FeeStructureId>,
    pub scope: DiscountScope,
    pub scope_id: Uuid,
    #[serde(rename = "type")]
    pub discount_type: DiscountType,
    pub value: Decimal,
    /// non-discountable admission portion of the base amount
    pub admission_fee: Money,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
}

/// payload for creating a discount rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDiscountRule {
    pub fee_structure_id: Option<FeeStructureId>,
    pub scope: DiscountScope,
    pub scope_id: Uuid,
    #[serde(rename = "type")]
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub admission_fee: Money,
}

impl NewDiscountRule {
    pub fn validate(&self) -> Result<()> {
        if self.value < Decimal::ZERO {
            return Err(FeeError::InvalidDiscount {
                message: format!("value {} is negative", self.value),
            });
        }
        if self.discount_type == DiscountType::Percentage && self.value > Decimal::from(100) {
            return Err(FeeError::InvalidDiscount {
                message: format!("percentage {} exceeds 100", self.value),
            });
        }
        if self.admission_fee.is_negative() {
            return Err(FeeError::InvalidDiscount {
                message: format!("admission fee {} is negative", self.admission_fee),
            });
        }
        Ok(())
    }
}

/// result of applying at most one rule to a base amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedDiscount {
    pub rule_id: Option<DiscountId>,
    pub base_amount: Money,
    pub discount: Money,
    pub payable: Money,
}

impl DiscountRule {
    /// portion of `base` the rule may reduce
    pub fn discountable(&self, base: Money) -> Money {
        (base - self.admission_fee).non_negative()
    }

    pub fn discount_on(&self, base: Money) -> Money {
        let discountable = self.discountable(base);
        let discount = match self.discount_type {
            DiscountType::Flat => Money::from_decimal(self.value).min(discountable),
            DiscountType::Percentage => discountable.portion(Rate::from_percentage(self.value)),
        };
        discount.non_negative().min(discountable)
    }
}

/// apply the resolved rule, if any; the payable never drops below the admission fee
pub fn apply_discount(base: Money, rule: Option<&DiscountRule>) -> AppliedDiscount {
    match rule {
        Some(rule) => {
            let discount = rule.discount_on(base);
            let floor = rule.admission_fee.min(base);
            AppliedDiscount {
                rule_id: Some(rule.id),
                base_amount: base,
                discount,
                payable: (base - discount).max(floor),
            }
        }
        None => AppliedDiscount {
            rule_id: None,
            base_amount: base,
            discount: Money::ZERO,
            payable: base,
        },
    }
}
