//! # Engagement Ledger Shared
//! This crate defines shared data structures and rules used across the engagement ledger.
//! It includes the vote toggle state machine, the denormalized engagement counters,
//! points ledger entries, metadata canonicalisation and reconciliation reports.
pub mod types;
