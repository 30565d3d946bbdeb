//! Assemble a running broker from configuration.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::{BrokerConfig, LedgerBackendConfig};
use crate::core::{
    AppResult, BackgroundTask, Broker, LivenessSweeper, PoolStats, ResourcePool, TaskLedger,
};
use crate::infra::{InMemoryLedger, SqliteConnectionManager, SqliteLedger};
use crate::util::clock::{Clock, SystemClock};

/// Builds a [`BrokerRuntime`] from a [`BrokerConfig`].
pub struct BrokerBuilder {
    config: BrokerConfig,
    clock: Arc<dyn Clock>,
    ledger: Option<Arc<dyn TaskLedger>>,
    sweeper: bool,
}

impl BrokerBuilder {
    /// Start from `config` with the system clock and the configured ledger.
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            ledger: None,
            sweeper: true,
        }
    }

    /// Use `clock` for the broker and the connection pool.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `ledger` instead of building the configured backend.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn TaskLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Do not start the background sweeper; callers run [`Broker::sweep`].
    #[must_use]
    pub const fn without_sweeper(mut self) -> Self {
        self.sweeper = false;
        self
    }

    /// Validate the configuration, build the ledger and start background tasks.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, the SQLite ledger cannot be
    /// opened, or a background thread cannot be spawned.
    pub fn build(self) -> AppResult<BrokerRuntime> {
        let Self {
            config,
            clock,
            ledger,
            sweeper,
        } = self;
        config.validate().context("broker configuration invalid")?;

        let mut pool = None;
        let mut pool_reaper = None;
        let ledger: Arc<dyn TaskLedger> = match (ledger, &config.ledger) {
            (Some(ledger), _) => ledger,
            (None, LedgerBackendConfig::InMemory { max_records }) => {
                Arc::new(InMemoryLedger::new(*max_records))
            }
            (None, LedgerBackendConfig::Sqlite { path }) => {
                let sqlite_pool = ResourcePool::with_clock(
                    SqliteConnectionManager::file(path),
                    config.pool.limits(),
                    Arc::clone(&clock),
                );
                let ledger = SqliteLedger::new(sqlite_pool.clone(), config.pool.acquire_timeout())
                    .with_context(|| format!("opening ledger at {}", path.display()))?;
                pool_reaper = Some(
                    sqlite_pool
                        .spawn_reaper(config.pool.reap_interval())
                        .context("spawning pool reaper")?,
                );
                pool = Some(sqlite_pool);
                Arc::new(ledger)
            }
        };

        let broker = Arc::new(Broker::new(config.settings(), ledger, clock));
        let sweeper = if sweeper {
            Some(
                LivenessSweeper::spawn(Arc::clone(&broker), config.sweep_interval())
                    .context("spawning liveness sweeper")?,
            )
        } else {
            None
        };

        info!(
            sweeper = sweeper.is_some(),
            sqlite = pool.is_some(),
            "broker runtime started"
        );
        Ok(BrokerRuntime {
            broker,
            sweeper,
            pool_reaper,
            pool,
        })
    }
}

/// Build a runtime from `config` with default wiring.
///
/// # Errors
///
/// See [`BrokerBuilder::build`].
pub fn build_broker(config: BrokerConfig) -> AppResult<BrokerRuntime> {
    BrokerBuilder::new(config).build()
}

/// A broker with its background tasks. Shuts down on drop.
pub struct BrokerRuntime {
    broker: Arc<Broker>,
    sweeper: Option<LivenessSweeper>,
    pool_reaper: Option<BackgroundTask>,
    pool: Option<ResourcePool<SqliteConnectionManager>>,
}

impl BrokerRuntime {
    /// Shared handle to the broker.
    #[must_use]
    pub fn broker(&self) -> Arc<Broker> {
        Arc::clone(&self.broker)
    }

    /// Whether the liveness sweeper is running.
    #[must_use]
    pub fn sweeper_running(&self) -> bool {
        self.sweeper.as_ref().is_some_and(LivenessSweeper::is_running)
    }

    /// Connection pool statistics, when the ledger runs on SQLite.
    #[must_use]
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.pool.as_ref().map(ResourcePool::stats)
    }

    /// Stop the sweeper and reaper, then shut the connection pool down.
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(mut sweeper) = self.sweeper.take() {
            sweeper.stop();
        }
        if let Some(mut reaper) = self.pool_reaper.take() {
            reaper.stop();
        }
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }
    }
}

impl Drop for BrokerRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
