//! Runledger Shared Types and Utilities
//!
//! This crate contains the credit-accounting data model, database helpers and
//! telemetry setup shared across Runledger crates.

pub mod db;
pub mod error;
pub mod telemetry;
pub mod types;

pub use db::*;
pub use error::*;
pub use telemetry::init_tracing;
pub use types::*;
