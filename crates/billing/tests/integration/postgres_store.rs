//! Integration tests for the PostgreSQL usage store
//!
//! These tests exercise the real SQL: the conditional balance deduction,
//! the ledger's unique source constraint and transaction rollback.
//!
//! ## Running Tests
//! ```bash
//! export DATABASE_URL="postgres://localhost/runledger_test"
//! cargo test -p runledger-billing --test postgres_store -- --ignored --test-threads=1
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use runledger_billing::{
    BillingError, ChargeMetadata, LedgerHistoryService, PgUsageStore, UsageConfig, UsageService,
    UsageStores,
};
use runledger_shared::{
    create_pool, run_migrations, CreditLedgerEntry, DatabaseConfig, QuestionType,
};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Test Utilities
// ============================================================================

/// Connect, migrate and create the platform tables the billing engine reads
async fn setup_pool() -> PgPool {
    let config =
        DatabaseConfig::from_env().expect("DATABASE_URL must be set for integration tests");
    let pool = create_pool(&config)
        .await
        .expect("Failed to connect to test database");

    run_migrations(&pool).await.expect("Failed to run migrations");

    for ddl in [
        "CREATE TABLE IF NOT EXISTS organizations (
            id UUID PRIMARY KEY,
            partner_id UUID,
            is_free_tier BOOLEAN NOT NULL DEFAULT FALSE
        )",
        "CREATE TABLE IF NOT EXISTS question_runs (
            id UUID PRIMARY KEY,
            batch_id UUID,
            total_cost NUMERIC(20, 10),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
        "CREATE TABLE IF NOT EXISTS org_evals (
            id UUID PRIMARY KEY,
            question_run_id UUID NOT NULL,
            org_id UUID NOT NULL,
            total_cost NUMERIC(20, 10),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
        "CREATE TABLE IF NOT EXISTS network_org_evals (
            id UUID PRIMARY KEY,
            question_run_id UUID NOT NULL,
            org_id UUID NOT NULL,
            total_cost NUMERIC(20, 10),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    ] {
        sqlx::query(ddl)
            .execute(&pool)
            .await
            .expect("Failed to create platform table");
    }

    pool
}

fn service(pool: &PgPool) -> (Arc<PgUsageStore>, UsageService) {
    let store = Arc::new(PgUsageStore::new(pool.clone()));
    let service = UsageService::new(UsageStores::from_store(store.clone()), UsageConfig::default());
    (store, service)
}

/// Create an organization with a fresh partner and an org balance
async fn create_test_org(pool: &PgPool, is_free_tier: bool, balance: Decimal) -> (Uuid, Uuid) {
    let org_id = Uuid::new_v4();
    let partner_id = Uuid::new_v4();

    sqlx::query("INSERT INTO organizations (id, partner_id, is_free_tier) VALUES ($1, $2, $3)")
        .bind(org_id)
        .bind(partner_id)
        .bind(is_free_tier)
        .execute(pool)
        .await
        .expect("Failed to create test organization");

    sqlx::query("INSERT INTO credit_balances (org_id, current_balance) VALUES ($1, $2)")
        .bind(org_id)
        .bind(balance)
        .execute(pool)
        .await
        .expect("Failed to create test balance");

    (org_id, partner_id)
}

async fn set_pricing(
    pool: &PgPool,
    partner_id: Uuid,
    fixed: Option<Decimal>,
    margin: Option<Decimal>,
) {
    sqlx::query(
        "INSERT INTO pricing_configs
             (partner_id, action, wholesale_fixed_price, wholesale_margin_pct)
         VALUES ($1, 'question_run', $2, $3)",
    )
    .bind(partner_id)
    .bind(fixed)
    .bind(margin)
    .execute(pool)
    .await
    .expect("Failed to create pricing config");
}

async fn create_batch(pool: &PgPool, costs: &[Option<Decimal>]) -> (Uuid, Vec<Uuid>) {
    let batch_id = Uuid::new_v4();
    let mut ids = Vec::new();

    for (i, cost) in costs.iter().enumerate() {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO question_runs (id, batch_id, total_cost, created_at)
             VALUES ($1, $2, $3, NOW() + make_interval(secs => $4))",
        )
        .bind(id)
        .bind(batch_id)
        .bind(cost)
        .bind(i as f64)
        .execute(pool)
        .await
        .expect("Failed to create question run");
        ids.push(id);
    }

    (batch_id, ids)
}

async fn org_balance(pool: &PgPool, org_id: Uuid) -> Decimal {
    let (balance,): (Decimal,) =
        sqlx::query_as("SELECT current_balance FROM credit_balances WHERE org_id = $1")
            .bind(org_id)
            .fetch_one(pool)
            .await
            .expect("Failed to read balance");
    balance
}

async fn ledger_count(pool: &PgPool, org_id: Uuid) -> i64 {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM credit_ledger WHERE org_id = $1")
        .bind(org_id)
        .fetch_one(pool)
        .await
        .expect("Failed to count ledger entries");
    count
}

/// Remove the organization's rows; ledger rows are append-only and stay
async fn cleanup_test_data(pool: &PgPool, org_id: Uuid, partner_id: Uuid) {
    sqlx::query("DELETE FROM org_evals WHERE org_id = $1")
        .bind(org_id)
        .execute(pool)
        .await
        .ok();

    sqlx::query("DELETE FROM pricing_configs WHERE partner_id = $1")
        .bind(partner_id)
        .execute(pool)
        .await
        .ok();

    sqlx::query("DELETE FROM credit_balances WHERE org_id = $1 OR partner_id = $2")
        .bind(org_id)
        .bind(partner_id)
        .execute(pool)
        .await
        .ok();

    sqlx::query("DELETE FROM organizations WHERE id = $1")
        .bind(org_id)
        .execute(pool)
        .await
        .ok();
}

// ============================================================================
// Test Cases
// ============================================================================

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_batch_charge_writes_ledger_and_deducts() {
    let pool = setup_pool().await;
    let (_, service) = service(&pool);
    let (org_id, partner_id) = create_test_org(&pool, false, dec!(1.00)).await;

    set_pricing(&pool, partner_id, Some(dec!(0.25)), Some(dec!(0.5))).await;

    let (batch_id, run_ids) = create_batch(&pool, &[Some(dec!(0.02)), None]).await;

    let summary = service
        .track_batch_usage_detailed(org_id, batch_id, QuestionType::Org)
        .await
        .expect("Charge should succeed");

    assert_eq!(summary.charged, 2);
    assert_eq!(summary.total_sale_price, dec!(0.29));
    assert_eq!(org_balance(&pool, org_id).await, dec!(0.71));
    assert_eq!(ledger_count(&pool, org_id).await, 2);

    let history = LedgerHistoryService::new(Arc::new(PgUsageStore::new(pool.clone())));
    let record = history
        .charge_for_run(run_ids[0])
        .await
        .expect("History lookup should succeed")
        .expect("Run should have been charged");
    assert_eq!(record.amount, dec!(0.04));
    assert_eq!(record.batch_id, Some(batch_id));

    cleanup_test_data(&pool, org_id, partner_id).await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_second_charge_of_same_batch_is_skipped() {
    let pool = setup_pool().await;
    let (_, service) = service(&pool);
    let (org_id, partner_id) = create_test_org(&pool, false, dec!(1.00)).await;
    let (batch_id, _) = create_batch(&pool, &[None, None]).await;

    let first = service
        .track_batch_usage(org_id, batch_id, QuestionType::Org)
        .await
        .expect("First charge should succeed");
    let second = service
        .track_batch_usage(org_id, batch_id, QuestionType::Org)
        .await
        .expect("Second charge should succeed");

    assert_eq!(first, 2);
    assert_eq!(second, 0);
    assert_eq!(org_balance(&pool, org_id).await, dec!(0.80));
    assert_eq!(ledger_count(&pool, org_id).await, 2);

    cleanup_test_data(&pool, org_id, partner_id).await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_insufficient_balance_rolls_back_whole_batch() {
    let pool = setup_pool().await;
    let (_, service) = service(&pool);
    let (org_id, partner_id) = create_test_org(&pool, false, dec!(0.15)).await;
    let (batch_id, _) = create_batch(&pool, &[None, None, None]).await;

    let result = service
        .track_batch_usage(org_id, batch_id, QuestionType::Org)
        .await;

    assert!(matches!(result, Err(BillingError::InsufficientCredits { .. })));
    assert_eq!(org_balance(&pool, org_id).await, dec!(0.15));
    assert_eq!(ledger_count(&pool, org_id).await, 0);

    cleanup_test_data(&pool, org_id, partner_id).await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_concurrent_charges_never_overdraw() {
    let pool = setup_pool().await;
    let (_, service) = service(&pool);
    let (org_id, partner_id) = create_test_org(&pool, false, dec!(0.25)).await;
    let (first_batch, _) = create_batch(&pool, &[None, None]).await;
    let (second_batch, _) = create_batch(&pool, &[None, None]).await;

    let (first, second) = tokio::join!(
        service.track_batch_usage(org_id, first_batch, QuestionType::Org),
        service.track_batch_usage(org_id, second_batch, QuestionType::Org),
    );

    assert_eq!([&first, &second].iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(org_balance(&pool, org_id).await, dec!(0.05));
    assert_eq!(ledger_count(&pool, org_id).await, 2);

    cleanup_test_data(&pool, org_id, partner_id).await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_free_tier_without_partner_balance_is_insufficient() {
    let pool = setup_pool().await;
    let (_, service) = service(&pool);
    let (org_id, partner_id) = create_test_org(&pool, true, dec!(10.00)).await;

    match service.check_balance(org_id, 3, QuestionType::Org).await {
        Err(BillingError::InsufficientCredits {
            balance, required, ..
        }) => {
            assert_eq!(balance, Decimal::ZERO);
            assert_eq!(required, dec!(0.30));
        }
        other => panic!("expected insufficient credits, got {:?}", other),
    }

    cleanup_test_data(&pool, org_id, partner_id).await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_concurrent_callers_fill_the_pool_without_starving() {
    let base = setup_pool().await;
    let callers = 2;

    let mut config = DatabaseConfig::from_env().expect("DATABASE_URL must be set");
    config.max_connections = callers;
    let pool = create_pool(&config).await.expect("Failed to create small pool");
    let (_, service) = service(&pool);

    let (first_org, first_partner) = create_test_org(&base, false, dec!(10.00)).await;
    let (second_org, second_partner) = create_test_org(&base, false, dec!(10.00)).await;
    let (first_batch, _) = create_batch(&base, &[Some(dec!(0.01)), None]).await;
    let (second_batch, _) = create_batch(&base, &[Some(dec!(0.01)), None]).await;

    let (first, second) = tokio::join!(
        service.track_batch_usage(first_org, first_batch, QuestionType::Org),
        service.track_batch_usage(second_org, second_batch, QuestionType::Org),
    );

    assert_eq!(first.expect("First caller should succeed"), 2);
    assert_eq!(second.expect("Second caller should succeed"), 2);
    assert_eq!(org_balance(&base, first_org).await, dec!(9.80));
    assert_eq!(org_balance(&base, second_org).await, dec!(9.80));

    cleanup_test_data(&base, first_org, first_partner).await;
    cleanup_test_data(&base, second_org, second_partner).await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn test_uneven_margin_recorded_price_matches_deduction() {
    let pool = setup_pool().await;
    let (_, service) = service(&pool);
    let (org_id, partner_id) = create_test_org(&pool, false, dec!(1.00)).await;
    set_pricing(&pool, partner_id, None, Some(dec!(0.3))).await;
    let (batch_id, _) = create_batch(
        &pool,
        &[Some(dec!(0.01)), Some(dec!(0.01)), Some(dec!(0.01))],
    )
    .await;

    let summary = service
        .track_batch_usage_detailed(org_id, batch_id, QuestionType::Org)
        .await
        .expect("Charge should succeed");

    let entries: Vec<CreditLedgerEntry> = sqlx::query_as(
        "SELECT entry_id, org_id, partner_id, amount, source_type, source_id,
                payer_type, metadata, created_at
         FROM credit_ledger WHERE org_id = $1",
    )
    .bind(org_id)
    .fetch_all(&pool)
    .await
    .expect("Failed to read ledger");

    let ledger_sum: Decimal = entries.iter().map(|e| -e.amount).sum();
    let metadata_sum: Decimal = entries
        .iter()
        .map(|e| {
            serde_json::from_value::<ChargeMetadata>(e.metadata.clone())
                .expect("Charge metadata should decode")
                .sale_price
        })
        .sum();

    assert_eq!(summary.total_sale_price, dec!(0.0428571429));
    assert_eq!(metadata_sum, summary.total_sale_price);
    assert_eq!(ledger_sum, summary.total_sale_price);
    assert_eq!(
        dec!(1.00) - org_balance(&pool, org_id).await,
        summary.total_sale_price
    );

    cleanup_test_data(&pool, org_id, partner_id).await;
}
