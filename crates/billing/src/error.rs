//! Billing error types

use rust_decimal::Decimal;
use runledger_shared::{BalanceOwner, SharedError};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Organization {0} is not associated with a partner")]
    NoPartner(Uuid),

    #[error("Insufficient credits for {payer} (balance: {balance:.2}, cost: {required:.2})")]
    InsufficientCredits {
        payer: BalanceOwner,
        balance: Decimal,
        required: Decimal,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Charge deadline of {0:?} exceeded, transaction rolled back")]
    DeadlineExceeded(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// True for the low-balance condition, whether raised by the pre-check or by deduction
    pub fn is_insufficient_credits(&self) -> bool {
        matches!(self, BillingError::InsufficientCredits { .. })
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<SharedError> for BillingError {
    fn from(err: SharedError) -> Self {
        match err {
            SharedError::MissingEnv(_) | SharedError::InvalidEnv { .. } => {
                BillingError::Config(err.to_string())
            }
            other => BillingError::InvalidInput(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(err: serde_json::Error) -> Self {
        BillingError::Internal(format!("Failed to encode ledger metadata: {}", err))
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
