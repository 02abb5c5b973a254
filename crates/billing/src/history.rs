//! Charge History Export
//!
//! Reads question-run charges back out of the credit ledger for:
//! - Customer usage statements
//! - Financial reconciliation against balances
//! - Auditing how each price was derived

use rust_decimal::Decimal;
use runledger_shared::{CreditLedgerEntry, LedgerSourceType, PayerType, PricingMode};
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::store::LedgerStore;
use crate::usage::ChargeMetadata;

/// Largest page of history returned in one call
const MAX_HISTORY_LIMIT: i64 = 10_000;

/// A question-run charge with its pricing metadata decoded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeRecord {
    pub entry_id: Uuid,
    pub question_run_id: Uuid,
    pub payer_type: PayerType,
    /// Positive amount debited from the payer
    pub amount: Decimal,
    pub wholesale_cost: Decimal,
    pub margin_pct: Decimal,
    pub pricing_mode: PricingMode,
    pub batch_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

impl ChargeRecord {
    pub fn from_entry(entry: &CreditLedgerEntry) -> BillingResult<Self> {
        let metadata: ChargeMetadata =
            serde_json::from_value(entry.metadata.clone()).map_err(|e| {
                BillingError::Internal(format!(
                    "Ledger entry {} has unreadable charge metadata: {}",
                    entry.entry_id, e
                ))
            })?;

        Ok(Self {
            entry_id: entry.entry_id,
            question_run_id: metadata.question_run_id,
            payer_type: entry.payer_type,
            amount: entry.amount.abs(),
            wholesale_cost: metadata.wholesale_cost,
            margin_pct: metadata.margin_pct,
            pricing_mode: metadata.pricing_mode,
            batch_id: metadata.batch_id,
            created_at: entry.created_at,
        })
    }
}

/// Service for reading and exporting charge history
pub struct LedgerHistoryService {
    ledger: Arc<dyn LedgerStore>,
}

impl LedgerHistoryService {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Question-run charges for an organization, newest first
    pub async fn charges_for_org(
        &self,
        org_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<ChargeRecord>> {
        if limit <= 0 || limit > MAX_HISTORY_LIMIT {
            return Err(BillingError::InvalidInput(format!(
                "limit must be between 1 and {}, got {}",
                MAX_HISTORY_LIMIT, limit
            )));
        }

        let entries = self.ledger.list_entries_for_org(org_id, limit).await?;

        entries
            .iter()
            .filter(|e| e.source_type == LedgerSourceType::QuestionRun)
            .map(ChargeRecord::from_entry)
            .collect()
    }

    /// The charge recorded for a run, if it has been charged
    pub async fn charge_for_run(&self, run_id: Uuid) -> BillingResult<Option<ChargeRecord>> {
        let entry = self
            .ledger
            .get_entry_by_source(LedgerSourceType::QuestionRun, &run_id.to_string())
            .await?;

        entry.as_ref().map(ChargeRecord::from_entry).transpose()
    }

    /// Sum of the organization's most recent `limit` charges
    pub async fn total_charged(&self, org_id: Uuid, limit: i64) -> BillingResult<Decimal> {
        Ok(self
            .charges_for_org(org_id, limit)
            .await?
            .iter()
            .map(|c| c.amount)
            .sum())
    }

    /// Export an organization's charges to CSV
    pub async fn export_org_charges_csv(&self, org_id: Uuid, limit: i64) -> BillingResult<String> {
        let records = self.charges_for_org(org_id, limit).await?;
        Ok(charges_to_csv(&records))
    }
}

/// Render charges as CSV, one row per charge
pub fn charges_to_csv(records: &[ChargeRecord]) -> String {
    let mut csv = String::new();

    csv.push_str("Date,Run,Payer,Amount,Wholesale Cost,Margin,Mode,Batch\n");

    for record in records {
        let date = record
            .created_at
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());
        let batch = record.batch_id.map(|b| b.to_string()).unwrap_or_default();

        csv.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            escape_csv_field(&date),
            record.question_run_id,
            record.payer_type,
            record.amount,
            record.wholesale_cost,
            record.margin_pct,
            record.pricing_mode,
            escape_csv_field(&batch)
        ));
    }

    csv
}

/// Escape a CSV field (wrap in quotes if contains comma, quote, or newline)
fn escape_csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
