//! Engagement Ledger Library
//!
//! Converts user actions into durable, idempotent point awards while keeping
//! live vote tallies on votable content. Exposes the `EngagementLedger`
//! service, its configuration and error types, and the tracing setup used by
//! the reconciliation binary.

pub mod config;
pub mod errors;
pub mod ledger;
pub mod telemetry;

pub use config::{Dependencies, LedgerConfig, LedgerSettings};
pub use errors::{AppError, LedgerError};
pub use ledger::EngagementLedger;
