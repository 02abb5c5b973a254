//! Error types for Runledger shared types

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SharedError {
    #[error("Invalid question type: {0}")]
    InvalidQuestionType(String),

    #[error("Invalid payer type: {0}")]
    InvalidPayerType(String),

    #[error("Invalid pricing mode: {0}")]
    InvalidPricingMode(String),

    #[error("Invalid ledger source type: {0}")]
    InvalidSourceType(String),

    #[error("Missing required environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid environment variable {name}: {reason}")]
    InvalidEnv { name: &'static str, reason: String },
}
