//! Wiring of the store, distributor client and sync engine.

use std::sync::Arc;

use collector_db::Database;
use collector_distributor::HttpDistributor;
use collector_sync::{AnomalyReport, RecoveryExecutor, RecoveryPlan, SyncReport};
use tracing::info;

use crate::config::AppConfig;

/// A configured collector: an open store and a signing distributor client.
pub struct Collector {
    config: AppConfig,
    store: Arc<Database>,
    client: Arc<HttpDistributor>,
}

impl Collector {
    /// Validate `config`, open the database and build the client.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let store = Database::open_with_pool_size(&config.database.path, config.database.pool_size)?;
        info!(path = %config.database.path.display(), "Database opened");

        let signer = Arc::new(config.signer()?);
        info!(sender = %signer.public_key_hex(), url = %config.distributor.url, "Distributor client ready");
        let client = HttpDistributor::new(&config.distributor_client_config(), signer)?;

        Ok(Self {
            config,
            store: Arc::new(store),
            client: Arc::new(client),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Database> {
        &self.store
    }

    /// A fresh executor over this collector's store and client.
    pub fn executor(&self) -> anyhow::Result<RecoveryExecutor> {
        let executor = RecoveryExecutor::new(
            self.client.clone(),
            self.store.clone(),
            self.config.sync.to_sync_config(),
        )?;
        Ok(executor)
    }

    /// Run one full sync pass.
    pub async fn sync(&self) -> anyhow::Result<SyncReport> {
        let mut executor = self.executor()?;
        Ok(executor.sync_data().await?)
    }

    /// Run the pre-flight anomaly check only.
    pub async fn check(&self) -> anyhow::Result<AnomalyReport> {
        Ok(self.executor()?.check_anomalies().await?)
    }

    /// Build a recovery plan without syncing.
    pub async fn plan(&self, full_verify: bool) -> anyhow::Result<Option<RecoveryPlan>> {
        Ok(self.executor()?.plan(full_verify).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.distributor.secret_key = Some("11".repeat(32));
        config.database.path = dir.join("nested").join("collector.db");
        config.database.pool_size = 2;
        config
    }

    #[test]
    fn test_new_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let collector = Collector::new(config(dir.path())).unwrap();
        assert!(dir.path().join("nested").join("collector.db").exists());
        assert_eq!(collector.store().cycle_count().unwrap(), 0);
        assert!(collector.executor().is_ok());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.distributor.secret_key = None;
        assert!(Collector::new(config).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_distributor_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.distributor.url = "http://127.0.0.1:9".into();
        config.sync.retry_attempts = 1;
        config.sync.retry_base_delay_ms = 1;
        let collector = Collector::new(config).unwrap();

        let err = collector.plan(false).await.unwrap_err();
        let err = err.downcast::<collector_sync::SyncError>().unwrap();
        assert!(matches!(err, collector_sync::SyncError::RetriesExhausted { attempts: 2, .. }));
    }
}
