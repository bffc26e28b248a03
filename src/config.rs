use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::decimal::{Money, Rate};
use crate::errors::{FeeError, Result};

/// fee desk configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    pub currency: String,
    pub tolerance: ToleranceConfig,
    pub surcharge_rate: Rate,
    pub discount_failure_policy: DiscountFailurePolicy,
    pub fallback: FallbackConfig,
}

/// amount tolerances used when reconciling against the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToleranceConfig {
    /// how far a stored allocation may drift from the expected base amount and still match
    pub allocation_match: Money,
    /// allowed gap between the installment sum and the payable amount
    pub schedule_sum: Money,
}

/// what to do when the discount lookup cannot reach the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscountFailurePolicy {
    /// proceed with no discount and carry a warning
    DegradeAndWarn,
    /// refuse to create the allocation until the operator acknowledges the warning
    RequireAcknowledgement,
}

/// local fallback cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub enabled: bool,
    /// directory for the json cache; in-memory when absent
    pub directory: Option<PathBuf>,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            currency: "INR".to_string(),
            tolerance: ToleranceConfig {
                allocation_match: Money::ONE,
                schedule_sum: Money::ONE,
            },
            surcharge_rate: Rate::ZERO,
            discount_failure_policy: DiscountFailurePolicy::DegradeAndWarn,
            fallback: FallbackConfig {
                enabled: true,
                directory: None,
            },
        }
    }
}

impl FeeConfig {
    /// stricter preset: a failed discount lookup blocks allocation creation
    pub fn strict() -> Self {
        Self {
            discount_failure_policy: DiscountFailurePolicy::RequireAcknowledgement,
            ..Self::default()
        }
    }

    /// preset with a flat surcharge on every new allocation (e.g. 18 for 18%)
    pub fn with_surcharge(percentage: Decimal) -> Self {
        Self {
            surcharge_rate: Rate::from_percentage(percentage),
            ..Self::default()
        }
    }

    /// parse and validate a json configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: FeeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.currency.trim().is_empty() {
            return Err(FeeError::InvalidConfiguration {
                message: "currency code is empty".to_string(),
            });
        }
        if self.tolerance.allocation_match.is_negative() || self.tolerance.schedule_sum.is_negative() {
            return Err(FeeError::InvalidConfiguration {
                message: "tolerances must not be negative".to_string(),
            });
        }
        let surcharge = self.surcharge_rate.as_decimal();
        if surcharge < Decimal::ZERO || surcharge > dec!(1) {
            return Err(FeeError::InvalidConfiguration {
                message: format!("surcharge rate {} outside 0%..100%", self.surcharge_rate),
            });
        }
        Ok(())
    }
}
