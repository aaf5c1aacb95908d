use dotenv::dotenv;
use engagement_ledger::telemetry::init_tracing;
use engagement_ledger::{AppError, Dependencies};
use tracing::info;

/// Main entry point of the Engagement Ledger reconciliation job.
///
/// Loads the environment, connects to PostgreSQL, applies migrations and
/// repairs every cached user total that drifted from the points ledger.
///
/// # Returns
///
/// A `Result` indicating success or an `AppError` if an
/// error occurs during initialization or execution.
#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenv().ok();
    init_tracing()?;

    let dependencies = Dependencies::new().await?;
    let corrected = dependencies.ledger.reconcile_all_users().await?;

    info!(corrected = corrected.len(), "Reconciliation complete");
    Ok(())
}
