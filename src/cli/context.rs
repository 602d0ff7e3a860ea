//! Composition root: wires configuration, storage and the remote client.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::adapters::sqlite::{initialize_database, PoolConfig, SqliteReconciliationStore, SqliteRuleRepository};
use crate::adapters::ticktick::TickTickClient;
use crate::domain::models::Config;
use crate::services::{PollScheduler, ReconcilerConfig, ReconciliationOrchestrator, SchedulerConfig};

pub struct AppContext {
    pub config: Config,
    pub pool: SqlitePool,
    pub store: Arc<SqliteReconciliationStore>,
    pub rules: Arc<SqliteRuleRepository>,
}

impl AppContext {
    /// Open and migrate the configured database.
    pub async fn open(config: Config) -> Result<Self> {
        let url = config.database.url();
        let pool = initialize_database(&url, Some(PoolConfig::from(&config.database)))
            .await
            .with_context(|| format!("Failed to open database at {}", config.database.path))?;

        Ok(Self {
            store: Arc::new(SqliteReconciliationStore::new(pool.clone())),
            rules: Arc::new(SqliteRuleRepository::new(pool.clone())),
            config,
            pool,
        })
    }

    pub fn client(&self) -> Result<TickTickClient> {
        let timeout = Duration::from_secs(self.config.sync.request_timeout_secs);
        TickTickClient::from_config(&self.config.ticktick, timeout).context("Failed to create TickTick client")
    }

    pub fn orchestrator(&self) -> Result<Arc<ReconciliationOrchestrator>> {
        let client = self.client()?;
        Ok(Arc::new(ReconciliationOrchestrator::new(
            Arc::new(client),
            self.store.clone(),
            self.rules.clone(),
            ReconcilerConfig::from(&self.config.sync),
        )))
    }

    pub fn scheduler(&self) -> Result<PollScheduler> {
        Ok(PollScheduler::new(
            self.orchestrator()?,
            SchedulerConfig::from(&self.config.sync),
        ))
    }
}
