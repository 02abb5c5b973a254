//! PostgreSQL usage store
//!
//! Deductions are a single conditional UPDATE so the balance can never go
//! negative, even when two charge transactions race for the same row. The
//! ledger's unique (source_type, source_id) constraint makes a second charge
//! for the same run a no-op.

use async_trait::async_trait;
use rust_decimal::Decimal;
use runledger_shared::{
    ActionKind, BalanceOwner, CreditBalance, CreditLedgerEntry, EvaluationRecord,
    LedgerSourceType, Organization, PricingConfig, QuestionRun,
};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::store::{
    BalanceStore, ChargeTransaction, EvaluationStore, LedgerInsert, LedgerStore,
    OrganizationStore, PricingStore, QuestionRunStore,
};

/// sqlx-backed implementation of every usage store capability
#[derive(Clone)]
pub struct PgUsageStore {
    pool: PgPool,
}

impl PgUsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OrganizationStore for PgUsageStore {
    async fn get_organization(&self, org_id: Uuid) -> BillingResult<Option<Organization>> {
        let org: Option<Organization> =
            sqlx::query_as("SELECT id, partner_id, is_free_tier FROM organizations WHERE id = $1")
                .bind(org_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(org)
    }
}

#[async_trait]
impl PricingStore for PgUsageStore {
    async fn get_pricing_config(
        &self,
        partner_id: Uuid,
        action: ActionKind,
    ) -> BillingResult<Option<PricingConfig>> {
        let config: Option<PricingConfig> = sqlx::query_as(
            "SELECT partner_id, action, wholesale_fixed_price, wholesale_margin_pct
             FROM pricing_configs WHERE partner_id = $1 AND action = $2",
        )
        .bind(partner_id)
        .bind(action)
        .fetch_optional(&self.pool)
        .await?;
        Ok(config)
    }
}

#[async_trait]
impl QuestionRunStore for PgUsageStore {
    async fn get_runs_by_batch(&self, batch_id: Uuid) -> BillingResult<Vec<QuestionRun>> {
        let runs: Vec<QuestionRun> = sqlx::query_as(
            "SELECT id, batch_id, total_cost, created_at
             FROM question_runs WHERE batch_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }

    async fn get_runs_by_ids(&self, run_ids: &[Uuid]) -> BillingResult<Vec<QuestionRun>> {
        let runs: Vec<QuestionRun> = sqlx::query_as(
            "SELECT id, batch_id, total_cost, created_at
             FROM question_runs WHERE id = ANY($1) ORDER BY created_at ASC, id ASC",
        )
        .bind(run_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }
}

#[async_trait]
impl EvaluationStore for PgUsageStore {
    async fn get_org_evaluations(
        &self,
        run_id: Uuid,
        org_id: Uuid,
    ) -> BillingResult<Vec<EvaluationRecord>> {
        let evals: Vec<EvaluationRecord> = sqlx::query_as(
            "SELECT id, question_run_id, org_id, total_cost, created_at
             FROM org_evals WHERE question_run_id = $1 AND org_id = $2",
        )
        .bind(run_id)
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(evals)
    }

    async fn get_network_evaluations(
        &self,
        run_id: Uuid,
        org_id: Uuid,
    ) -> BillingResult<Vec<EvaluationRecord>> {
        let evals: Vec<EvaluationRecord> = sqlx::query_as(
            "SELECT id, question_run_id, org_id, total_cost, created_at
             FROM network_org_evals WHERE question_run_id = $1 AND org_id = $2",
        )
        .bind(run_id)
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(evals)
    }
}

#[async_trait]
impl BalanceStore for PgUsageStore {
    async fn get_balance(&self, owner: BalanceOwner) -> BillingResult<Option<CreditBalance>> {
        let query = match owner {
            BalanceOwner::Org(_) => {
                "SELECT id, org_id, partner_id, current_balance, updated_at
                 FROM credit_balances WHERE org_id = $1"
            }
            BalanceOwner::Partner(_) => {
                "SELECT id, org_id, partner_id, current_balance, updated_at
                 FROM credit_balances WHERE partner_id = $1"
            }
        };

        let balance: Option<CreditBalance> = sqlx::query_as(query)
            .bind(owner.id())
            .fetch_optional(&self.pool)
            .await?;
        Ok(balance)
    }
}

#[async_trait]
impl LedgerStore for PgUsageStore {
    async fn begin(&self) -> BillingResult<Box<dyn ChargeTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgChargeTransaction { tx }))
    }

    async fn get_entry_by_source(
        &self,
        source_type: LedgerSourceType,
        source_id: &str,
    ) -> BillingResult<Option<CreditLedgerEntry>> {
        let entry: Option<CreditLedgerEntry> = sqlx::query_as(
            "SELECT entry_id, org_id, partner_id, amount, source_type, source_id,
                    payer_type, metadata, created_at
             FROM credit_ledger WHERE source_type = $1 AND source_id = $2",
        )
        .bind(source_type)
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn list_entries_for_org(
        &self,
        org_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<CreditLedgerEntry>> {
        let entries: Vec<CreditLedgerEntry> = sqlx::query_as(
            "SELECT entry_id, org_id, partner_id, amount, source_type, source_id,
                    payer_type, metadata, created_at
             FROM credit_ledger WHERE org_id = $1
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(org_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}

/// Charge transaction on a pooled connection; sqlx rolls back on drop
pub struct PgChargeTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ChargeTransaction for PgChargeTransaction {
    async fn insert_ledger_entry(
        &mut self,
        entry: &CreditLedgerEntry,
    ) -> BillingResult<LedgerInsert> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO credit_ledger (
                entry_id, org_id, partner_id, amount, source_type, source_id,
                payer_type, metadata, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (source_type, source_id) DO NOTHING
            RETURNING entry_id
            "#,
        )
        .bind(entry.entry_id)
        .bind(entry.org_id)
        .bind(entry.partner_id)
        .bind(entry.amount)
        .bind(entry.source_type)
        .bind(&entry.source_id)
        .bind(entry.payer_type)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(match inserted {
            Some(_) => LedgerInsert::Inserted,
            None => LedgerInsert::AlreadyCharged,
        })
    }

    async fn deduct_balance(
        &mut self,
        owner: BalanceOwner,
        amount: Decimal,
    ) -> BillingResult<Decimal> {
        // ATOMIC: check and deduct in one statement; concurrent deductions
        // re-evaluate the WHERE clause after acquiring the row lock
        let (deduct, current) = match owner {
            BalanceOwner::Org(_) => (
                r#"
                UPDATE credit_balances
                SET current_balance = current_balance - $2, updated_at = NOW()
                WHERE org_id = $1 AND current_balance >= $2
                RETURNING current_balance
                "#,
                "SELECT current_balance FROM credit_balances WHERE org_id = $1",
            ),
            BalanceOwner::Partner(_) => (
                r#"
                UPDATE credit_balances
                SET current_balance = current_balance - $2, updated_at = NOW()
                WHERE partner_id = $1 AND current_balance >= $2
                RETURNING current_balance
                "#,
                "SELECT current_balance FROM credit_balances WHERE partner_id = $1",
            ),
        };

        let updated: Option<(Decimal,)> = sqlx::query_as(deduct)
            .bind(owner.id())
            .bind(amount)
            .fetch_optional(&mut *self.tx)
            .await?;

        if let Some((new_balance,)) = updated {
            return Ok(new_balance);
        }

        // No row updated: either no balance row or not enough credit
        let observed: Option<(Decimal,)> = sqlx::query_as(current)
            .bind(owner.id())
            .fetch_optional(&mut *self.tx)
            .await?;
        let balance = observed.map(|(b,)| b).unwrap_or(Decimal::ZERO);

        if balance >= amount {
            // Zero charge against a missing row
            return Ok(balance);
        }

        Err(BillingError::InsufficientCredits {
            payer: owner,
            balance,
            required: amount,
        })
    }

    async fn commit(self: Box<Self>) -> BillingResult<()> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> BillingResult<()> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }
}
