//! Usage billing configuration
//!
//! Configuration via environment variables:
//! - `USAGE_DEFAULT_RUN_PRICE`: Sale price per question run when no partner
//!   pricing applies (default: 0.10)
//! - `USAGE_CHARGE_TIMEOUT_SECS`: Deadline for one charge call; unset means no deadline

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{BillingError, BillingResult};

/// Standard sale price for a single successful question run
pub const DEFAULT_QUESTION_RUN_PRICE: Decimal = dec!(0.10);

/// Settings for the usage charge pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct UsageConfig {
    /// Fallback sale price per run
    pub default_run_price: Decimal,
    /// Upper bound on a whole track call; the transaction rolls back when it elapses
    pub charge_timeout: Option<Duration>,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            default_run_price: DEFAULT_QUESTION_RUN_PRICE,
            charge_timeout: None,
        }
    }
}

impl UsageConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let default_run_price = match std::env::var("USAGE_DEFAULT_RUN_PRICE") {
            Ok(raw) => {
                let price = Decimal::from_str(raw.trim()).map_err(|e| {
                    BillingError::Config(format!("USAGE_DEFAULT_RUN_PRICE {:?}: {}", raw, e))
                })?;
                if price.is_sign_negative() {
                    return Err(BillingError::Config(
                        "USAGE_DEFAULT_RUN_PRICE must not be negative".to_string(),
                    ));
                }
                price
            }
            Err(_) => DEFAULT_QUESTION_RUN_PRICE,
        };

        let charge_timeout = match std::env::var("USAGE_CHARGE_TIMEOUT_SECS") {
            Ok(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    BillingError::Config(format!(
                        "USAGE_CHARGE_TIMEOUT_SECS must be a whole number of seconds, got {:?}",
                        raw
                    ))
                })?;
                Some(Duration::from_secs(secs))
            }
            Err(_) => None,
        };

        Ok(Self {
            default_run_price,
            charge_timeout,
        })
    }

    pub fn with_charge_timeout(mut self, timeout: Duration) -> Self {
        self.charge_timeout = Some(timeout);
        self
    }

    pub fn with_default_run_price(mut self, price: Decimal) -> Self {
        self.default_run_price = price;
        self
    }
}
