//! In-memory usage store (for development and tests without PostgreSQL)
//!
//! Balances and the ledger sit behind one mutex. An open transaction holds
//! that mutex and works on a staged copy, so concurrent transactions are
//! serialized and nothing becomes visible until commit.

use async_trait::async_trait;
use rust_decimal::Decimal;
use runledger_shared::{
    ActionKind, BalanceOwner, CreditBalance, CreditLedgerEntry, EvaluationRecord,
    LedgerSourceType, Organization, PricingConfig, QuestionRun,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::store::{
    BalanceStore, ChargeTransaction, EvaluationStore, LedgerInsert, LedgerStore,
    OrganizationStore, PricingStore, QuestionRunStore,
};

#[derive(Default)]
struct ReferenceData {
    organizations: HashMap<Uuid, Organization>,
    pricing: HashMap<(Uuid, ActionKind), PricingConfig>,
    runs: Vec<QuestionRun>,
    org_evaluations: Vec<EvaluationRecord>,
    network_evaluations: Vec<EvaluationRecord>,
}

#[derive(Debug, Clone, Default)]
struct Accounts {
    balances: HashMap<BalanceOwner, CreditBalance>,
    ledger: Vec<CreditLedgerEntry>,
}

/// Process-local implementation of every usage store capability
#[derive(Default)]
pub struct InMemoryUsageStore {
    reference: RwLock<ReferenceData>,
    accounts: Arc<Mutex<Accounts>>,
    deduct_delay: Option<Duration>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep inside every deduction, to exercise charge deadlines
    pub fn with_deduct_delay(mut self, delay: Duration) -> Self {
        self.deduct_delay = Some(delay);
        self
    }

    pub async fn insert_organization(&self, org: Organization) {
        self.reference
            .write()
            .await
            .organizations
            .insert(org.id, org);
    }

    pub async fn set_pricing(&self, config: PricingConfig) {
        self.reference
            .write()
            .await
            .pricing
            .insert((config.partner_id, config.action), config);
    }

    pub async fn insert_run(&self, run: QuestionRun) {
        self.reference.write().await.runs.push(run);
    }

    pub async fn insert_org_evaluation(&self, evaluation: EvaluationRecord) {
        self.reference.write().await.org_evaluations.push(evaluation);
    }

    pub async fn insert_network_evaluation(&self, evaluation: EvaluationRecord) {
        self.reference
            .write()
            .await
            .network_evaluations
            .push(evaluation);
    }

    /// Create or overwrite a balance row
    pub async fn set_balance(&self, owner: BalanceOwner, amount: Decimal) {
        let mut accounts = self.accounts.lock().await;
        let id = accounts
            .balances
            .get(&owner)
            .map(|b| b.id)
            .unwrap_or_else(Uuid::new_v4);
        accounts.balances.insert(
            owner,
            CreditBalance {
                id,
                org_id: owner.org_id(),
                partner_id: owner.partner_id(),
                current_balance: amount,
                updated_at: OffsetDateTime::now_utc(),
            },
        );
    }

    /// Committed balance, zero when no row exists
    pub async fn balance_of(&self, owner: BalanceOwner) -> Decimal {
        self.accounts
            .lock()
            .await
            .balances
            .get(&owner)
            .map(|b| b.current_balance)
            .unwrap_or(Decimal::ZERO)
    }

    /// Committed ledger entries in insertion order
    pub async fn ledger_entries(&self) -> Vec<CreditLedgerEntry> {
        self.accounts.lock().await.ledger.clone()
    }
}

fn sorted_runs(mut runs: Vec<QuestionRun>) -> Vec<QuestionRun> {
    runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    runs
}

fn matching_evaluations(
    evaluations: &[EvaluationRecord],
    run_id: Uuid,
    org_id: Uuid,
) -> Vec<EvaluationRecord> {
    evaluations
        .iter()
        .filter(|e| e.question_run_id == run_id && e.org_id == org_id)
        .cloned()
        .collect()
}

#[async_trait]
impl OrganizationStore for InMemoryUsageStore {
    async fn get_organization(&self, org_id: Uuid) -> BillingResult<Option<Organization>> {
        Ok(self.reference.read().await.organizations.get(&org_id).cloned())
    }
}

#[async_trait]
impl PricingStore for InMemoryUsageStore {
    async fn get_pricing_config(
        &self,
        partner_id: Uuid,
        action: ActionKind,
    ) -> BillingResult<Option<PricingConfig>> {
        Ok(self
            .reference
            .read()
            .await
            .pricing
            .get(&(partner_id, action))
            .cloned())
    }
}

#[async_trait]
impl QuestionRunStore for InMemoryUsageStore {
    async fn get_runs_by_batch(&self, batch_id: Uuid) -> BillingResult<Vec<QuestionRun>> {
        let reference = self.reference.read().await;
        Ok(sorted_runs(
            reference
                .runs
                .iter()
                .filter(|r| r.batch_id == Some(batch_id))
                .cloned()
                .collect(),
        ))
    }

    async fn get_runs_by_ids(&self, run_ids: &[Uuid]) -> BillingResult<Vec<QuestionRun>> {
        let reference = self.reference.read().await;
        Ok(sorted_runs(
            reference
                .runs
                .iter()
                .filter(|r| run_ids.contains(&r.id))
                .cloned()
                .collect(),
        ))
    }
}

#[async_trait]
impl EvaluationStore for InMemoryUsageStore {
    async fn get_org_evaluations(
        &self,
        run_id: Uuid,
        org_id: Uuid,
    ) -> BillingResult<Vec<EvaluationRecord>> {
        let reference = self.reference.read().await;
        Ok(matching_evaluations(&reference.org_evaluations, run_id, org_id))
    }

    async fn get_network_evaluations(
        &self,
        run_id: Uuid,
        org_id: Uuid,
    ) -> BillingResult<Vec<EvaluationRecord>> {
        let reference = self.reference.read().await;
        Ok(matching_evaluations(
            &reference.network_evaluations,
            run_id,
            org_id,
        ))
    }
}

#[async_trait]
impl BalanceStore for InMemoryUsageStore {
    async fn get_balance(&self, owner: BalanceOwner) -> BillingResult<Option<CreditBalance>> {
        Ok(self.accounts.lock().await.balances.get(&owner).cloned())
    }
}

#[async_trait]
impl LedgerStore for InMemoryUsageStore {
    async fn begin(&self) -> BillingResult<Box<dyn ChargeTransaction>> {
        let guard = self.accounts.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryChargeTransaction {
            guard,
            staged,
            deduct_delay: self.deduct_delay,
        }))
    }

    async fn get_entry_by_source(
        &self,
        source_type: LedgerSourceType,
        source_id: &str,
    ) -> BillingResult<Option<CreditLedgerEntry>> {
        let accounts = self.accounts.lock().await;
        Ok(accounts
            .ledger
            .iter()
            .find(|e| e.source_type == source_type && e.source_id.as_deref() == Some(source_id))
            .cloned())
    }

    async fn list_entries_for_org(
        &self,
        org_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<CreditLedgerEntry>> {
        let limit = usize::try_from(limit)
            .map_err(|_| BillingError::InvalidInput(format!("invalid limit {}", limit)))?;
        let accounts = self.accounts.lock().await;
        let mut entries: Vec<CreditLedgerEntry> = accounts
            .ledger
            .iter()
            .filter(|e| e.org_id == Some(org_id))
            .cloned()
            .collect();
        // Newest first; insertion order breaks timestamp ties
        entries.reverse();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit);
        Ok(entries)
    }
}

/// Transaction over a staged copy of balances and ledger
pub struct InMemoryChargeTransaction {
    guard: OwnedMutexGuard<Accounts>,
    staged: Accounts,
    deduct_delay: Option<Duration>,
}

#[async_trait]
impl ChargeTransaction for InMemoryChargeTransaction {
    async fn insert_ledger_entry(
        &mut self,
        entry: &CreditLedgerEntry,
    ) -> BillingResult<LedgerInsert> {
        let duplicate = entry.source_id.is_some()
            && self.staged.ledger.iter().any(|e| {
                e.source_type == entry.source_type && e.source_id == entry.source_id
            });
        if duplicate {
            return Ok(LedgerInsert::AlreadyCharged);
        }

        self.staged.ledger.push(entry.clone());
        Ok(LedgerInsert::Inserted)
    }

    async fn deduct_balance(
        &mut self,
        owner: BalanceOwner,
        amount: Decimal,
    ) -> BillingResult<Decimal> {
        if let Some(delay) = self.deduct_delay {
            tokio::time::sleep(delay).await;
        }

        let Some(balance) = self.staged.balances.get_mut(&owner) else {
            if amount <= Decimal::ZERO {
                return Ok(Decimal::ZERO);
            }
            return Err(BillingError::InsufficientCredits {
                payer: owner,
                balance: Decimal::ZERO,
                required: amount,
            });
        };

        if balance.current_balance < amount {
            return Err(BillingError::InsufficientCredits {
                payer: owner,
                balance: balance.current_balance,
                required: amount,
            });
        }

        balance.current_balance -= amount;
        balance.updated_at = OffsetDateTime::now_utc();
        Ok(balance.current_balance)
    }

    async fn commit(self: Box<Self>) -> BillingResult<()> {
        let InMemoryChargeTransaction {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> BillingResult<()> {
        Ok(())
    }
}
