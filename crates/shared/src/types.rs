//! Common types used across Runledger

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::SharedError;

// =============================================================================
// Enums
// =============================================================================

/// Which evaluation flow produced a question run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    /// Organization-scoped questions
    Org,
    /// Network-scoped questions, always paid by the partner
    Network,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Org => "org",
            Self::Network => "network",
        }
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "org" => Ok(Self::Org),
            "network" => Ok(Self::Network),
            other => Err(SharedError::InvalidQuestionType(other.to_string())),
        }
    }
}

/// Whose balance a ledger entry was charged against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum PayerType {
    Org,
    Partner,
}

impl PayerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Org => "ORG",
            Self::Partner => "PARTNER",
        }
    }
}

impl std::fmt::Display for PayerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayerType {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ORG" => Ok(Self::Org),
            "PARTNER" => Ok(Self::Partner),
            other => Err(SharedError::InvalidPayerType(other.to_string())),
        }
    }
}

/// How a sale price was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingMode {
    /// Fixed per-run price (partner-configured or the platform default)
    Fixed,
    /// Raw cost marked up by the partner margin
    Dynamic,
}

impl PricingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Dynamic => "dynamic",
        }
    }
}

impl std::fmt::Display for PricingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PricingMode {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(Self::Fixed),
            "dynamic" => Ok(Self::Dynamic),
            other => Err(SharedError::InvalidPricingMode(other.to_string())),
        }
    }
}

/// Origin of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LedgerSourceType {
    /// Metered charge for one completed question run
    QuestionRun,
}

impl LedgerSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuestionRun => "question_run",
        }
    }
}

impl std::fmt::Display for LedgerSourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerSourceType {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "question_run" => Ok(Self::QuestionRun),
            other => Err(SharedError::InvalidSourceType(other.to_string())),
        }
    }
}

/// Billable action a partner can configure pricing for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    QuestionRun,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuestionRun => "question_run",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Balance ownership
// =============================================================================

/// Owner of a credit balance: exactly one of organization or partner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum BalanceOwner {
    Org(Uuid),
    Partner(Uuid),
}

impl BalanceOwner {
    pub fn payer_type(&self) -> PayerType {
        match self {
            Self::Org(_) => PayerType::Org,
            Self::Partner(_) => PayerType::Partner,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Org(id) | Self::Partner(id) => *id,
        }
    }

    pub fn org_id(&self) -> Option<Uuid> {
        match self {
            Self::Org(id) => Some(*id),
            Self::Partner(_) => None,
        }
    }

    pub fn partner_id(&self) -> Option<Uuid> {
        match self {
            Self::Org(_) => None,
            Self::Partner(id) => Some(*id),
        }
    }
}

impl std::fmt::Display for BalanceOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Org(id) => write!(f, "org {}", id),
            Self::Partner(id) => write!(f, "partner {}", id),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// Organization as seen by billing (owned elsewhere, read-only here)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Organization {
    pub id: Uuid,
    /// Billing requires a partner; `None` is an association error
    pub partner_id: Option<Uuid>,
    pub is_free_tier: bool,
}

/// A completed question run produced by the extraction pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct QuestionRun {
    pub id: Uuid,
    pub batch_id: Option<Uuid>,
    /// Direct AI provider cost, if the run carried one
    pub total_cost: Option<Decimal>,
    pub created_at: OffsetDateTime,
}

/// Evaluation of a question run for one organization
///
/// Organization-scoped and network-scoped evaluations share this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct EvaluationRecord {
    pub id: Uuid,
    pub question_run_id: Uuid,
    pub org_id: Uuid,
    pub total_cost: Option<Decimal>,
    pub created_at: OffsetDateTime,
}

/// Partner pricing for one action kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PricingConfig {
    pub partner_id: Uuid,
    pub action: ActionKind,
    pub wholesale_fixed_price: Option<Decimal>,
    /// Fraction in [0, 1); sale price = raw cost / (1 - margin)
    pub wholesale_margin_pct: Option<Decimal>,
}

/// Current credit balance of an organization or partner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CreditBalance {
    pub id: Uuid,
    pub org_id: Option<Uuid>,
    pub partner_id: Option<Uuid>,
    pub current_balance: Decimal,
    pub updated_at: OffsetDateTime,
}

impl CreditBalance {
    /// Owner of this balance, `None` if the row is keyed inconsistently
    pub fn owner(&self) -> Option<BalanceOwner> {
        match (self.org_id, self.partner_id) {
            (Some(org_id), None) => Some(BalanceOwner::Org(org_id)),
            (None, Some(partner_id)) => Some(BalanceOwner::Partner(partner_id)),
            _ => None,
        }
    }
}

/// Immutable credit ledger record. Negative amounts are charges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CreditLedgerEntry {
    pub entry_id: Uuid,
    pub org_id: Option<Uuid>,
    pub partner_id: Option<Uuid>,
    pub amount: Decimal,
    pub source_type: LedgerSourceType,
    pub source_id: Option<String>,
    pub payer_type: PayerType,
    pub metadata: serde_json::Value,
    pub created_at: OffsetDateTime,
}
