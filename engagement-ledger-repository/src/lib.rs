//! # Engagement Ledger Repository
//! This crate provides the storage trait of the engagement ledger and its
//! implementations: PostgreSQL for production and an in-memory store for tests
//! and local development.
pub mod errors;
pub mod interfaces;
pub mod memory;
pub mod postgres;

pub use errors::EngagementRepositoryError;
pub use interfaces::EngagementRepository;
pub use memory::InMemoryEngagementRepository;
pub use postgres::PostgresEngagementRepository;
