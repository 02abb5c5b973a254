//! Store capabilities consumed by the usage engine
//!
//! Each trait covers one entity so components depend only on what they read
//! or write. `PgUsageStore` implements all of them against PostgreSQL and
//! `InMemoryUsageStore` against process memory.

use async_trait::async_trait;
use rust_decimal::Decimal;
use runledger_shared::{
    ActionKind, BalanceOwner, CreditBalance, CreditLedgerEntry, EvaluationRecord,
    LedgerSourceType, Organization, PricingConfig, QuestionRun,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::BillingResult;

#[async_trait]
pub trait OrganizationStore: Send + Sync {
    async fn get_organization(&self, org_id: Uuid) -> BillingResult<Option<Organization>>;
}

#[async_trait]
pub trait PricingStore: Send + Sync {
    async fn get_pricing_config(
        &self,
        partner_id: Uuid,
        action: ActionKind,
    ) -> BillingResult<Option<PricingConfig>>;
}

#[async_trait]
pub trait QuestionRunStore: Send + Sync {
    /// Runs of a batch, oldest first
    async fn get_runs_by_batch(&self, batch_id: Uuid) -> BillingResult<Vec<QuestionRun>>;

    /// Runs with the given ids, oldest first; unknown ids are ignored
    async fn get_runs_by_ids(&self, run_ids: &[Uuid]) -> BillingResult<Vec<QuestionRun>>;
}

#[async_trait]
pub trait EvaluationStore: Send + Sync {
    async fn get_org_evaluations(
        &self,
        run_id: Uuid,
        org_id: Uuid,
    ) -> BillingResult<Vec<EvaluationRecord>>;

    async fn get_network_evaluations(
        &self,
        run_id: Uuid,
        org_id: Uuid,
    ) -> BillingResult<Vec<EvaluationRecord>>;
}

#[async_trait]
pub trait BalanceStore: Send + Sync {
    async fn get_balance(&self, owner: BalanceOwner) -> BillingResult<Option<CreditBalance>>;
}

/// Outcome of appending a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerInsert {
    Inserted,
    /// An entry with the same source type and source id already exists
    AlreadyCharged,
}

/// Ledger writes and balance deductions that commit or roll back together.
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait ChargeTransaction: Send {
    async fn insert_ledger_entry(&mut self, entry: &CreditLedgerEntry)
        -> BillingResult<LedgerInsert>;

    /// Deduct `amount` from the owner's balance and return the new balance.
    ///
    /// Fails with `InsufficientCredits` when the balance observed inside the
    /// transaction is below `amount`; a missing balance row counts as zero.
    async fn deduct_balance(&mut self, owner: BalanceOwner, amount: Decimal)
        -> BillingResult<Decimal>;

    async fn commit(self: Box<Self>) -> BillingResult<()>;

    async fn rollback(self: Box<Self>) -> BillingResult<()>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> BillingResult<Box<dyn ChargeTransaction>>;

    async fn get_entry_by_source(
        &self,
        source_type: LedgerSourceType,
        source_id: &str,
    ) -> BillingResult<Option<CreditLedgerEntry>>;

    /// Entries that reference the organization, newest first
    async fn list_entries_for_org(
        &self,
        org_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<CreditLedgerEntry>>;
}

/// Handles to every store the usage engine reads or writes
#[derive(Clone)]
pub struct UsageStores {
    pub organizations: Arc<dyn OrganizationStore>,
    pub pricing: Arc<dyn PricingStore>,
    pub runs: Arc<dyn QuestionRunStore>,
    pub evaluations: Arc<dyn EvaluationStore>,
    pub balances: Arc<dyn BalanceStore>,
    pub ledger: Arc<dyn LedgerStore>,
}

impl UsageStores {
    /// Use one backing store for every capability
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: OrganizationStore
            + PricingStore
            + QuestionRunStore
            + EvaluationStore
            + BalanceStore
            + LedgerStore
            + 'static,
    {
        Self {
            organizations: store.clone(),
            pricing: store.clone(),
            runs: store.clone(),
            evaluations: store.clone(),
            balances: store.clone(),
            ledger: store,
        }
    }
}
