//! Connection pool and ledger backend configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{ConfigError, PoolLimits};

/// Ledger backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerBackendConfig {
    /// Bounded in-memory ledger for development and testing.
    InMemory {
        /// Records kept before the oldest is dropped.
        max_records: usize,
    },
    /// SQLite database file accessed through the connection pool.
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
}

impl Default for LedgerBackendConfig {
    fn default() -> Self {
        Self::InMemory {
            max_records: 10_000,
        }
    }
}

/// Bounded connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionPoolConfig {
    /// Maximum open connections.
    pub max_size: usize,
    /// How long a checkout waits for a free connection, in seconds.
    pub acquire_timeout_secs: u64,
    /// Idle connections older than this are closed by the reaper, in seconds.
    pub idle_timeout_secs: u64,
    /// Reaper interval in seconds.
    pub reap_interval_secs: u64,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            acquire_timeout_secs: 5,
            idle_timeout_secs: 300,
            reap_interval_secs: 60,
        }
    }
}

impl ConnectionPoolConfig {
    /// Validate pool values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first zero value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::Invalid("max_size must be greater than 0".into()));
        }
        if self.acquire_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "acquire_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "idle_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.reap_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "reap_interval_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Capacity and idle limits for a [`crate::core::ResourcePool`].
    #[must_use]
    pub const fn limits(&self) -> PoolLimits {
        PoolLimits {
            max_size: self.max_size,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }

    /// Checkout timeout.
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Reaper interval.
    #[must_use]
    pub const fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}
