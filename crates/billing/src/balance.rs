//! Pre-flight balance check for pending question runs
//!
//! The estimate uses the partner's fixed price (or the default price) per
//! question because no run costs exist yet. The check is advisory: the
//! deduction inside the charge transaction is what actually guards the
//! balance.

use rust_decimal::Decimal;
use runledger_shared::QuestionType;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::payer::load_billable_org;
use crate::pricing::{estimated_run_price, PricingResolver};
use crate::store::{BalanceStore, OrganizationStore};

#[derive(Clone)]
pub struct BalanceChecker {
    organizations: Arc<dyn OrganizationStore>,
    balances: Arc<dyn BalanceStore>,
    pricing: PricingResolver,
    default_run_price: Decimal,
}

impl BalanceChecker {
    pub fn new(
        organizations: Arc<dyn OrganizationStore>,
        balances: Arc<dyn BalanceStore>,
        pricing: PricingResolver,
        default_run_price: Decimal,
    ) -> Self {
        Self {
            organizations,
            balances,
            pricing,
            default_run_price,
        }
    }

    /// Verify the payer can cover `question_count` runs and return the estimated cost
    pub async fn check_balance(
        &self,
        org_id: Uuid,
        question_count: i64,
        question_type: QuestionType,
    ) -> BillingResult<Decimal> {
        if question_count <= 0 {
            return Err(BillingError::InvalidInput(format!(
                "question count must be greater than 0, got {}",
                question_count
            )));
        }

        let org = load_billable_org(self.organizations.as_ref(), org_id).await?;

        let config = self.pricing.question_run_pricing(org.partner_id).await?;
        let run_price = estimated_run_price(config.as_ref(), self.default_run_price)?;
        let estimated_cost = run_price
            .checked_mul(Decimal::from(question_count))
            .ok_or_else(|| {
                BillingError::InvalidInput(format!(
                    "estimated cost of {} questions at {} overflows",
                    question_count, run_price
                ))
            })?;

        let payer = org.payer(question_type);
        let balance = self
            .balances
            .get_balance(payer)
            .await?
            .map(|b| b.current_balance)
            .unwrap_or(Decimal::ZERO);

        if balance < estimated_cost {
            tracing::warn!(
                org_id = %org_id,
                partner_id = %org.partner_id,
                payer_type = %payer.payer_type(),
                balance = %balance,
                estimated_cost = %estimated_cost,
                "Insufficient credits for pending questions"
            );
            return Err(BillingError::InsufficientCredits {
                payer,
                balance,
                required: estimated_cost,
            });
        }

        tracing::info!(
            org_id = %org_id,
            partner_id = %org.partner_id,
            payer_type = %payer.payer_type(),
            question_type = %question_type,
            question_count = question_count,
            balance = %balance,
            estimated_cost = %estimated_cost,
            "Balance sufficient for pending questions"
        );

        Ok(estimated_cost)
    }
}
