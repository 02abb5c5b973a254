//! Partner pricing and margin-based sale prices
//!
//! A run's sale price is resolved in this order:
//! 1. Raw cost > 0 and a partner margin configured: `raw / (1 - margin)` ("dynamic")
//! 2. Partner fixed wholesale price configured: that price ("fixed")
//! 3. Otherwise the platform default price ("fixed")
//!
//! Sale prices and margins are rounded to [`MONEY_SCALE`] decimal places, the
//! scale of the ledger and balance columns, so the recorded price is exactly
//! the amount deducted.

use rust_decimal::{Decimal, RoundingStrategy};
use runledger_shared::{ActionKind, PricingConfig, PricingMode};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::store::PricingStore;

/// Decimal places stored for money amounts (`NUMERIC(20, 10)`)
pub const MONEY_SCALE: u32 = 10;

/// Round an amount to the stored money scale, halves away from zero
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Looks up partner pricing, treating a missing row as "use defaults"
#[derive(Clone)]
pub struct PricingResolver {
    store: Arc<dyn PricingStore>,
}

impl PricingResolver {
    pub fn new(store: Arc<dyn PricingStore>) -> Self {
        Self { store }
    }

    /// Pricing configured for question runs, `None` when the partner has none
    pub async fn question_run_pricing(
        &self,
        partner_id: Uuid,
    ) -> BillingResult<Option<PricingConfig>> {
        self.resolve(partner_id, ActionKind::QuestionRun).await
    }

    pub async fn resolve(
        &self,
        partner_id: Uuid,
        action: ActionKind,
    ) -> BillingResult<Option<PricingConfig>> {
        let config = self.store.get_pricing_config(partner_id, action).await?;
        if config.is_none() {
            tracing::debug!(
                partner_id = %partner_id,
                action = %action,
                "No partner pricing configured, using defaults"
            );
        }
        Ok(config)
    }
}

/// Priced outcome for one run, recorded verbatim in ledger metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChargeQuote {
    pub sale_price: Decimal,
    pub raw_cost: Decimal,
    pub margin_pct: Decimal,
    pub mode: PricingMode,
}

/// Compute the sale price for a run with the given raw (wholesale) cost
pub fn quote_sale_price(
    raw_cost: Decimal,
    config: Option<&PricingConfig>,
    default_price: Decimal,
) -> BillingResult<ChargeQuote> {
    let margin = config.and_then(|c| c.wholesale_margin_pct);
    let fixed_price = config.and_then(|c| c.wholesale_fixed_price);

    if raw_cost > Decimal::ZERO {
        if let Some(margin) = margin {
            validate_margin(margin)?;
            return Ok(ChargeQuote {
                sale_price: round_money(raw_cost / (Decimal::ONE - margin)),
                raw_cost,
                margin_pct: margin,
                mode: PricingMode::Dynamic,
            });
        }
    }

    let sale_price = round_money(match fixed_price {
        Some(price) => {
            validate_fixed_price(price)?;
            price
        }
        None => default_price,
    });

    Ok(ChargeQuote {
        sale_price,
        raw_cost,
        margin_pct: effective_margin(sale_price, raw_cost),
        mode: PricingMode::Fixed,
    })
}

/// Pre-flight price per run: the partner's fixed price, else the default
pub fn estimated_run_price(
    config: Option<&PricingConfig>,
    default_price: Decimal,
) -> BillingResult<Decimal> {
    match config.and_then(|c| c.wholesale_fixed_price) {
        Some(price) => {
            validate_fixed_price(price)?;
            Ok(round_money(price))
        }
        None => Ok(round_money(default_price)),
    }
}

/// Margin actually earned by a fixed price; zero when there is no raw cost to compare against
fn effective_margin(sale_price: Decimal, raw_cost: Decimal) -> Decimal {
    if raw_cost <= Decimal::ZERO || sale_price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    round_money((sale_price - raw_cost) / sale_price)
}

fn validate_margin(margin: Decimal) -> BillingResult<()> {
    // margin >= 1 would divide by zero or flip the sign of the sale price
    if margin >= Decimal::ONE || margin < Decimal::ZERO {
        return Err(BillingError::Config(format!(
            "Partner margin {} is invalid, must be at least 0 and below 1",
            margin
        )));
    }
    Ok(())
}

fn validate_fixed_price(price: Decimal) -> BillingResult<()> {
    if price < Decimal::ZERO {
        return Err(BillingError::Config(format!(
            "Partner fixed price {} is invalid, must not be negative",
            price
        )));
    }
    Ok(())
}
