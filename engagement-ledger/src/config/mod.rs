//! Configuration module for the Engagement Ledger.
//! Defines and manages application-wide settings and dependencies.
mod dependencies;
mod settings;

pub use dependencies::Dependencies;
pub use settings::{ConfigError, LedgerConfig, LedgerSettings};
