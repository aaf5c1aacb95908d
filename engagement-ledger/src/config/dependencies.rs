use std::sync::Arc;

use engagement_ledger_repository::PostgresEngagementRepository;
use tracing::info;

use crate::config::LedgerConfig;
use crate::errors::AppError;
use crate::EngagementLedger;

/// `Dependencies` holds the wired components of a ledger process.
///
/// The PostgreSQL repository is exposed next to the service so call sites can
/// run ledger writes inside their own transactions.
pub struct Dependencies {
    pub config: LedgerConfig,
    pub repository: Arc<PostgresEngagementRepository>,
    pub ledger: EngagementLedger,
}

impl Dependencies {
    /// Reads the configuration, connects to PostgreSQL, applies migrations and
    /// builds the ledger service.
    pub async fn new() -> Result<Self, AppError> {
        let config = LedgerConfig::from_env()?;
        Self::from_config(config).await
    }

    pub async fn from_config(config: LedgerConfig) -> Result<Self, AppError> {
        let repository = Arc::new(
            PostgresEngagementRepository::connect(&config.database_url, config.max_connections).await?,
        );
        repository.migrate().await?;
        info!(max_connections = config.max_connections, "Engagement ledger storage ready");

        let ledger = EngagementLedger::new(repository.clone(), config.settings.clone());

        Ok(Dependencies { config, repository, ledger })
    }
}
