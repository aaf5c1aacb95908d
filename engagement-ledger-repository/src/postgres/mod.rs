//! PostgreSQL backend of the engagement repository.
mod engagement_repository;

pub use engagement_repository::PostgresEngagementRepository;
