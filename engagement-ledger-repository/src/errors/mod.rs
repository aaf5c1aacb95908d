//! Error types for the engagement ledger repository.
//! Consolidates and re-exports error types related to repository operations.
mod engagement;

pub use engagement::EngagementRepositoryError;
