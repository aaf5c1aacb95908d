//! Error types for the Engagement Ledger.
//! `LedgerError` is the taxonomy surfaced to call sites; `AppError` consolidates
//! the failures of the reconciliation binary.
use engagement_ledger_repository::EngagementRepositoryError;
use engagement_ledger_shared::types::PointsAwardError;

use crate::config::ConfigError;

/// Errors returned by every `EngagementLedger` operation.
///
/// A failed operation has no effect: its transaction is rolled back as a whole.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Storage error: {0}")]
    Storage(#[source] EngagementRepositoryError),
}

impl From<EngagementRepositoryError> for LedgerError {
    fn from(error: EngagementRepositoryError) -> Self {
        match error {
            EngagementRepositoryError::UserNotFound(_) | EngagementRepositoryError::TargetNotFound(_, _) => {
                LedgerError::NotFound(error.to_string())
            }
            EngagementRepositoryError::Conflict(message) => LedgerError::Conflict(message),
            EngagementRepositoryError::InvalidAward(invalid) => LedgerError::from(invalid),
            other => LedgerError::Storage(other),
        }
    }
}

impl From<PointsAwardError> for LedgerError {
    fn from(error: PointsAwardError) -> Self {
        LedgerError::Validation(error.to_string())
    }
}

/// Errors of the `engagement-ledger` binary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Repository error: {0}")]
    Repository(#[from] EngagementRepositoryError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Tracing error: {0}")]
    Tracing(String),
}
