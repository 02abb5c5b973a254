//! Runledger Billing
//!
//! Usage metering and credit accounting for question runs: balance
//! pre-checks, margin-based pricing and the transactional charge pipeline
//! that writes ledger entries and deducts payer balances.

pub mod balance;
pub mod config;
pub mod cost;
pub mod error;
pub mod history;
pub mod memory;
pub mod payer;
pub mod postgres;
pub mod pricing;
pub mod store;
pub mod token_cost;
pub mod usage;

pub use balance::BalanceChecker;
pub use config::{UsageConfig, DEFAULT_QUESTION_RUN_PRICE};
pub use cost::{latest_evaluation, CostAggregator, RawCost};
pub use error::{BillingError, BillingResult};
pub use history::{ChargeRecord, LedgerHistoryService};
pub use memory::InMemoryUsageStore;
pub use payer::{load_billable_org, resolve_payer, BillableOrg};
pub use postgres::PgUsageStore;
pub use pricing::{
    estimated_run_price, quote_sale_price, round_money, ChargeQuote, PricingResolver, MONEY_SCALE,
};
pub use store::{
    BalanceStore, ChargeTransaction, EvaluationStore, LedgerInsert, LedgerStore,
    OrganizationStore, PricingStore, QuestionRunStore, UsageStores,
};
pub use token_cost::{ModelRate, ProviderCostTable, ProviderFamily};
pub use usage::{ChargeMetadata, ChargeSummary, UsageService};
