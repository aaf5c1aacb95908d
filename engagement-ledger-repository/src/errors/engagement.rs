//! Error types for the engagement repository.
//! Defines specific errors that can occur during storage operations on votes,
//! counters and the points ledger.
use engagement_ledger_shared::types::{MetadataError, PointsAwardError, TargetId, TargetType, UserId};
use thiserror::Error;

/// SQLSTATE raised by PostgreSQL on a unique constraint violation.
const UNIQUE_VIOLATION: &str = "23505";

/// Represents errors that can occur within the engagement repository.
///
/// Any of these aborts the surrounding transaction; callers never observe a
/// partially applied operation.
#[derive(Debug, Error)]
pub enum EngagementRepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(sqlx::Error),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Vote target not found: {0:?} {1}")]
    TargetNotFound(TargetType, TargetId),

    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("Invalid vote type: {0}")]
    InvalidVoteType(i16),

    #[error("Invalid target type: {0}")]
    InvalidTargetType(i16),

    #[error("Invalid award: {0}")]
    InvalidAward(#[from] PointsAwardError),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(#[from] MetadataError),

    #[error("Stored state is inconsistent: {0}")]
    Inconsistent(String),
}

impl From<sqlx::Error> for EngagementRepositoryError {
    fn from(error: sqlx::Error) -> Self {
        let is_unique_violation = error
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| code == UNIQUE_VIOLATION);

        if is_unique_violation {
            EngagementRepositoryError::Conflict(error.to_string())
        } else {
            EngagementRepositoryError::DatabaseError(error)
        }
    }
}
