//! Question-run usage charging
//!
//! Converts completed question runs into ledger charges and balance
//! deductions. Every call runs in a single transaction: either every run in
//! the call is charged or none is.

use rust_decimal::Decimal;
use runledger_shared::{
    BalanceOwner, CreditLedgerEntry, LedgerSourceType, PricingConfig, PricingMode, QuestionRun,
    QuestionType,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::balance::BalanceChecker;
use crate::config::UsageConfig;
use crate::cost::{CostAggregator, RawCost};
use crate::error::{BillingError, BillingResult};
use crate::payer::{load_billable_org, BillableOrg};
use crate::pricing::{quote_sale_price, ChargeQuote, PricingResolver};
use crate::store::{
    ChargeTransaction, LedgerInsert, LedgerStore, OrganizationStore, QuestionRunStore,
    UsageStores,
};

/// Pricing details stored with every question-run ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeMetadata {
    pub question_run_id: Uuid,
    pub org_id: Uuid,
    pub partner_id: Uuid,
    pub run_cost: Decimal,
    pub evaluation_cost: Decimal,
    pub wholesale_cost: Decimal,
    pub sale_price: Decimal,
    pub margin_pct: Decimal,
    pub pricing_mode: PricingMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
}

/// Result of one charge call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeSummary {
    pub payer: BalanceOwner,
    /// Runs newly charged by this call
    pub charged: usize,
    /// Runs skipped because a ledger entry already existed
    pub already_charged: usize,
    pub total_sale_price: Decimal,
}

impl ChargeSummary {
    fn empty(payer: BalanceOwner) -> Self {
        Self {
            payer,
            charged: 0,
            already_charged: 0,
            total_sale_price: Decimal::ZERO,
        }
    }
}

/// Usage charging service
#[derive(Clone)]
pub struct UsageService {
    organizations: Arc<dyn OrganizationStore>,
    runs: Arc<dyn QuestionRunStore>,
    ledger: Arc<dyn LedgerStore>,
    costs: CostAggregator,
    pricing: PricingResolver,
    checker: BalanceChecker,
    config: UsageConfig,
}

impl UsageService {
    pub fn new(stores: UsageStores, config: UsageConfig) -> Self {
        let pricing = PricingResolver::new(stores.pricing.clone());
        let checker = BalanceChecker::new(
            stores.organizations.clone(),
            stores.balances.clone(),
            pricing.clone(),
            config.default_run_price,
        );

        Self {
            organizations: stores.organizations,
            runs: stores.runs,
            ledger: stores.ledger,
            costs: CostAggregator::new(stores.evaluations),
            pricing,
            checker,
            config,
        }
    }

    pub fn config(&self) -> &UsageConfig {
        &self.config
    }

    /// Advisory pre-check; see [`BalanceChecker::check_balance`]
    pub async fn check_balance(
        &self,
        org_id: Uuid,
        question_count: i64,
        question_type: QuestionType,
    ) -> BillingResult<Decimal> {
        self.checker
            .check_balance(org_id, question_count, question_type)
            .await
    }

    /// Charge every run of a batch; returns the number of newly charged runs
    pub async fn track_batch_usage(
        &self,
        org_id: Uuid,
        batch_id: Uuid,
        question_type: QuestionType,
    ) -> BillingResult<usize> {
        Ok(self
            .track_batch_usage_detailed(org_id, batch_id, question_type)
            .await?
            .charged)
    }

    pub async fn track_batch_usage_detailed(
        &self,
        org_id: Uuid,
        batch_id: Uuid,
        question_type: QuestionType,
    ) -> BillingResult<ChargeSummary> {
        let org = load_billable_org(self.organizations.as_ref(), org_id).await?;

        let runs = self.runs.get_runs_by_batch(batch_id).await?;
        if runs.is_empty() {
            tracing::info!(
                org_id = %org_id,
                batch_id = %batch_id,
                "No question runs found for batch, nothing to charge"
            );
            return Ok(ChargeSummary::empty(org.payer(question_type)));
        }

        let summary = self.charge_runs(&org, &runs, question_type).await?;

        tracing::info!(
            org_id = %org_id,
            batch_id = %batch_id,
            charged = summary.charged,
            already_charged = summary.already_charged,
            total_sale_price = %summary.total_sale_price,
            "Charged question runs for batch"
        );

        Ok(summary)
    }

    /// Charge an explicit list of runs; returns the number of newly charged runs
    pub async fn track_individual_runs(
        &self,
        org_id: Uuid,
        run_ids: &[Uuid],
        question_type: QuestionType,
    ) -> BillingResult<usize> {
        Ok(self
            .track_individual_runs_detailed(org_id, run_ids, question_type)
            .await?
            .charged)
    }

    pub async fn track_individual_runs_detailed(
        &self,
        org_id: Uuid,
        run_ids: &[Uuid],
        question_type: QuestionType,
    ) -> BillingResult<ChargeSummary> {
        let org = load_billable_org(self.organizations.as_ref(), org_id).await?;

        if run_ids.is_empty() {
            tracing::info!(org_id = %org_id, "No run ids provided, nothing to charge");
            return Ok(ChargeSummary::empty(org.payer(question_type)));
        }

        let runs = self.runs.get_runs_by_ids(run_ids).await?;
        if runs.is_empty() {
            tracing::info!(
                org_id = %org_id,
                requested = run_ids.len(),
                "None of the requested question runs exist, nothing to charge"
            );
            return Ok(ChargeSummary::empty(org.payer(question_type)));
        }

        let summary = self.charge_runs(&org, &runs, question_type).await?;

        tracing::info!(
            org_id = %org_id,
            requested = run_ids.len(),
            charged = summary.charged,
            already_charged = summary.already_charged,
            total_sale_price = %summary.total_sale_price,
            "Charged individual question runs"
        );

        Ok(summary)
    }

    /// Sale price, raw cost, margin and pricing mode for one run
    pub async fn get_margin_based_cost(
        &self,
        run: &QuestionRun,
        org_id: Uuid,
        partner_id: Uuid,
        question_type: QuestionType,
    ) -> BillingResult<ChargeQuote> {
        let config = self.pricing.question_run_pricing(partner_id).await?;
        let (_, quote) = self
            .price_run(run, org_id, config.as_ref(), question_type)
            .await?;
        Ok(quote)
    }

    async fn price_run(
        &self,
        run: &QuestionRun,
        org_id: Uuid,
        config: Option<&PricingConfig>,
        question_type: QuestionType,
    ) -> BillingResult<(RawCost, ChargeQuote)> {
        let raw = self.costs.raw_cost(run, org_id, question_type).await?;
        let quote = quote_sale_price(raw.total(), config, self.config.default_run_price)?;
        Ok((raw, quote))
    }

    /// Charge runs in one transaction, bounded by the configured deadline
    async fn charge_runs(
        &self,
        org: &BillableOrg,
        runs: &[QuestionRun],
        question_type: QuestionType,
    ) -> BillingResult<ChargeSummary> {
        let work = self.charge_runs_in_transaction(org, runs, question_type);

        match self.config.charge_timeout {
            // Dropping the in-flight future drops its transaction, which rolls back
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::error!(
                        org_id = %org.org_id,
                        runs = runs.len(),
                        timeout_ms = limit.as_millis() as u64,
                        "Charge deadline exceeded, nothing was charged"
                    );
                    Err(BillingError::DeadlineExceeded(limit))
                }
            },
            None => work.await,
        }
    }

    async fn charge_runs_in_transaction(
        &self,
        org: &BillableOrg,
        runs: &[QuestionRun],
        question_type: QuestionType,
    ) -> BillingResult<ChargeSummary> {
        // Store reads run before begin() so a call never holds more than one
        // pool connection at a time
        let charges = self.price_runs(org, runs, question_type).await?;

        let mut tx = self.ledger.begin().await?;

        let payer = org.payer(question_type);
        let result = self.apply_charges(tx.as_mut(), org, payer, &charges).await;

        match result {
            Ok(summary) => {
                tx.commit().await?;
                Ok(summary)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(
                        org_id = %org.org_id,
                        error = %rollback_err,
                        "Failed to roll back charge transaction"
                    );
                }
                tracing::warn!(
                    org_id = %org.org_id,
                    partner_id = %org.partner_id,
                    runs = runs.len(),
                    error = %e,
                    "Charge transaction rolled back, nothing was charged"
                );
                Err(e)
            }
        }
    }

    /// Price every run and build its ledger entry, in run order
    async fn price_runs(
        &self,
        org: &BillableOrg,
        runs: &[QuestionRun],
        question_type: QuestionType,
    ) -> BillingResult<Vec<PendingCharge>> {
        let payer = org.payer(question_type);
        let config = self.pricing.question_run_pricing(org.partner_id).await?;
        let mut charges = Vec::with_capacity(runs.len());

        for run in runs {
            let (raw, quote) = match self
                .price_run(run, org.org_id, config.as_ref(), question_type)
                .await
            {
                Ok(priced) => priced,
                Err(e) => {
                    tracing::warn!(
                        run_id = %run.id,
                        org_id = %org.org_id,
                        error = %e,
                        "Failed to price question run, nothing was charged"
                    );
                    return Err(e);
                }
            };

            charges.push(PendingCharge {
                run_id: run.id,
                entry: question_run_entry(run, org, payer, &raw, &quote)?,
                quote,
            });
        }

        Ok(charges)
    }

    async fn apply_charges(
        &self,
        tx: &mut dyn ChargeTransaction,
        org: &BillableOrg,
        payer: BalanceOwner,
        charges: &[PendingCharge],
    ) -> BillingResult<ChargeSummary> {
        let mut summary = ChargeSummary::empty(payer);

        for charge in charges {
            let quote = &charge.quote;

            if tx.insert_ledger_entry(&charge.entry).await? == LedgerInsert::AlreadyCharged {
                tracing::warn!(
                    run_id = %charge.run_id,
                    org_id = %org.org_id,
                    "Question run already charged, skipping"
                );
                summary.already_charged += 1;
                continue;
            }

            let new_balance = match tx.deduct_balance(payer, quote.sale_price).await {
                Ok(balance) => balance,
                Err(e) => {
                    tracing::warn!(
                        run_id = %charge.run_id,
                        payer = %payer,
                        sale_price = %quote.sale_price,
                        error = %e,
                        "Failed to deduct question run charge"
                    );
                    return Err(e);
                }
            };

            tracing::debug!(
                run_id = %charge.run_id,
                payer_type = %payer.payer_type(),
                sale_price = %quote.sale_price,
                wholesale_cost = %quote.raw_cost,
                margin_pct = %quote.margin_pct,
                pricing_mode = %quote.mode,
                balance_after = %new_balance,
                "Charged question run"
            );

            summary.charged += 1;
            summary.total_sale_price += quote.sale_price;
        }

        Ok(summary)
    }
}

/// A priced run waiting to be written inside the charge transaction
struct PendingCharge {
    run_id: Uuid,
    entry: CreditLedgerEntry,
    quote: ChargeQuote,
}

/// Ledger entry debiting `payer` for one run
fn question_run_entry(
    run: &QuestionRun,
    org: &BillableOrg,
    payer: BalanceOwner,
    raw: &RawCost,
    quote: &ChargeQuote,
) -> BillingResult<CreditLedgerEntry> {
    let metadata = ChargeMetadata {
        question_run_id: run.id,
        org_id: org.org_id,
        partner_id: org.partner_id,
        run_cost: raw.run_cost,
        evaluation_cost: raw.evaluation_cost,
        wholesale_cost: quote.raw_cost,
        sale_price: quote.sale_price,
        margin_pct: quote.margin_pct,
        pricing_mode: quote.mode,
        batch_id: run.batch_id,
    };

    Ok(CreditLedgerEntry {
        entry_id: Uuid::new_v4(),
        org_id: Some(org.org_id),
        partner_id: Some(org.partner_id),
        amount: -quote.sale_price,
        source_type: LedgerSourceType::QuestionRun,
        source_id: Some(run.id.to_string()),
        payer_type: payer.payer_type(),
        metadata: serde_json::to_value(&metadata)?,
        created_at: OffsetDateTime::now_utc(),
    })
}
