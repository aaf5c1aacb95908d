use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::errors::AppError;

/// Installs the global subscriber: an `EnvFilter` (from `RUST_LOG`, falling
/// back to the ledger crates at `info`) and a JSON console layer.
pub fn init_tracing() -> Result<(), AppError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "engagement_ledger=info,engagement_ledger_repository=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json(),
        )
        .try_init()
        .map_err(|error| AppError::Tracing(error.to_string()))?;

    info!(
        service_name = "engagement-ledger",
        service_version = env!("CARGO_PKG_VERSION"),
        "Tracing initialized"
    );
    Ok(())
}
