//! Broker configuration: timing, orphan policy, ledger and pool.
//!
//! Loaded from JSON with [`BrokerConfig::from_json_str`] or from `BROKER_*`
//! environment variables with [`BrokerConfig::from_env`]. Missing fields take
//! their defaults; every load path validates before returning.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::pool::{ConnectionPoolConfig, LedgerBackendConfig};
use crate::core::{BrokerSettings, ConfigError, OrphanPolicy};

/// Root broker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Agents silent for longer than this are not routed to, in seconds.
    pub heartbeat_timeout_secs: u64,
    /// Agents silent for longer than this are evicted, in seconds.
    pub dead_threshold_secs: u64,
    /// Sweeper interval in seconds.
    pub sweep_interval_secs: u64,
    /// Unclaimed results older than this are dropped, in seconds.
    pub result_retention_secs: u64,
    /// Handling of tasks queued for departed agents.
    pub orphan_policy: OrphanPolicy,
    /// Ledger backend.
    pub ledger: LedgerBackendConfig,
    /// Connection pool backing the SQLite ledger.
    pub pool: ConnectionPoolConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 60,
            dead_threshold_secs: 120,
            sweep_interval_secs: 30,
            result_retention_secs: 600,
            orphan_policy: OrphanPolicy::Drop,
            ledger: LedgerBackendConfig::default(),
            pool: ConnectionPoolConfig::default(),
        }
    }
}

fn nonzero(name: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
    }
    Ok(())
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        name: name.to_owned(),
        reason: e.to_string(),
    })
}

impl BrokerConfig {
    /// Validate timing, ledger and pool values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for zero durations or sizes, or a dead
    /// threshold shorter than the heartbeat timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        nonzero("heartbeat_timeout_secs", self.heartbeat_timeout_secs)?;
        nonzero("dead_threshold_secs", self.dead_threshold_secs)?;
        nonzero("sweep_interval_secs", self.sweep_interval_secs)?;
        nonzero("result_retention_secs", self.result_retention_secs)?;
        if self.dead_threshold_secs < self.heartbeat_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "dead_threshold_secs ({}) must not be less than heartbeat_timeout_secs ({})",
                self.dead_threshold_secs, self.heartbeat_timeout_secs
            )));
        }
        match &self.ledger {
            LedgerBackendConfig::InMemory { max_records } if *max_records == 0 => {
                return Err(ConfigError::Invalid(
                    "ledger max_records must be greater than 0".into(),
                ));
            }
            LedgerBackendConfig::Sqlite { path } if path.as_os_str().is_empty() => {
                return Err(ConfigError::Invalid("ledger path must not be empty".into()));
            }
            _ => {}
        }
        self.pool
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("pool: {e}")))
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::Invalid`] for values that fail validation.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(input)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from `BROKER_*` environment variables, reading a `.env` file
    /// first if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] for a malformed variable and
    /// [`ConfigError::Invalid`] if the result fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => {
                return Err(ConfigError::Env {
                    name: ".env".into(),
                    reason: e.to_string(),
                })
            }
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    ///
    /// Recognized names: `BROKER_HEARTBEAT_TIMEOUT_SECS`,
    /// `BROKER_DEAD_THRESHOLD_SECS`, `BROKER_SWEEP_INTERVAL_SECS`,
    /// `BROKER_RESULT_RETENTION_SECS`, `BROKER_ORPHAN_POLICY` (`drop` or
    /// `fail`), `BROKER_LEDGER_PATH` (selects SQLite),
    /// `BROKER_LEDGER_MAX_RECORDS`, `BROKER_POOL_MAX_SIZE`,
    /// `BROKER_POOL_ACQUIRE_TIMEOUT_SECS`, `BROKER_POOL_IDLE_TIMEOUT_SECS` and
    /// `BROKER_POOL_REAP_INTERVAL_SECS`.
    ///
    /// # Errors
    ///
    /// Same as [`BrokerConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        let secs = |name: &str, slot: &mut u64| -> Result<(), ConfigError> {
            if let Some(raw) = lookup(name) {
                *slot = parse_var(name, &raw)?;
            }
            Ok(())
        };
        secs("BROKER_HEARTBEAT_TIMEOUT_SECS", &mut cfg.heartbeat_timeout_secs)?;
        secs("BROKER_DEAD_THRESHOLD_SECS", &mut cfg.dead_threshold_secs)?;
        secs("BROKER_SWEEP_INTERVAL_SECS", &mut cfg.sweep_interval_secs)?;
        secs("BROKER_RESULT_RETENTION_SECS", &mut cfg.result_retention_secs)?;
        secs("BROKER_POOL_ACQUIRE_TIMEOUT_SECS", &mut cfg.pool.acquire_timeout_secs)?;
        secs("BROKER_POOL_IDLE_TIMEOUT_SECS", &mut cfg.pool.idle_timeout_secs)?;
        secs("BROKER_POOL_REAP_INTERVAL_SECS", &mut cfg.pool.reap_interval_secs)?;

        if let Some(raw) = lookup("BROKER_POOL_MAX_SIZE") {
            cfg.pool.max_size = parse_var("BROKER_POOL_MAX_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("BROKER_ORPHAN_POLICY") {
            cfg.orphan_policy = match raw.trim().to_ascii_lowercase().as_str() {
                "drop" => OrphanPolicy::Drop,
                "fail" => OrphanPolicy::Fail,
                other => {
                    return Err(ConfigError::Env {
                        name: "BROKER_ORPHAN_POLICY".into(),
                        reason: format!("expected `drop` or `fail`, got `{other}`"),
                    })
                }
            };
        }
        if let Some(path) = lookup("BROKER_LEDGER_PATH") {
            cfg.ledger = LedgerBackendConfig::Sqlite {
                path: PathBuf::from(path),
            };
        } else if let Some(raw) = lookup("BROKER_LEDGER_MAX_RECORDS") {
            cfg.ledger = LedgerBackendConfig::InMemory {
                max_records: parse_var("BROKER_LEDGER_MAX_RECORDS", &raw)?,
            };
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Broker timing and policy derived from this configuration.
    #[must_use]
    pub const fn settings(&self) -> BrokerSettings {
        BrokerSettings {
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            dead_threshold: Duration::from_secs(self.dead_threshold_secs),
            result_retention: Duration::from_secs(self.result_retention_secs),
            orphan_policy: self.orphan_policy,
        }
    }

    /// Sweeper interval.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
