//! Error types for broker, ledger and pool operations.

use std::time::Duration;

use thiserror::Error;

use crate::util::serde::{AgentId, TaskId};

/// Errors produced by the connection pool.
///
/// Invalid connections are never surfaced; they are closed and replaced.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No connection became available within the acquire timeout.
    #[error("connection pool exhausted after {waited:?}")]
    Exhausted {
        /// How long the caller waited.
        waited: Duration,
    },
    /// The connection manager failed to open a new connection.
    #[error("failed to open connection: {0}")]
    Connect(String),
    /// The pool has been shut down.
    #[error("connection pool is shut down")]
    Shutdown,
}

/// Errors produced by task ledger backends.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Could not check out a storage connection.
    #[error("ledger pool: {0}")]
    Pool(#[from] PoolError),
    /// Backend-specific failure with context.
    #[error("ledger storage: {0}")]
    Storage(String),
    /// Payload could not be encoded or decoded.
    #[error("ledger serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned to broker callers.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// No live agent advertises the required capability. Nothing was queued.
    #[error("no live agent available for capability `{}`", .capability.as_deref().unwrap_or("*"))]
    NoAgentAvailable {
        /// Capability the submission required, if any.
        capability: Option<String>,
    },
    /// The agent id is not registered; the agent must register again.
    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),
    /// No result arrived before the deadline.
    #[error("timed out after {waited:?} waiting for task {task_id}")]
    Timeout {
        /// Task being awaited.
        task_id: TaskId,
        /// How long the caller waited.
        waited: Duration,
    },
    /// The durable ledger rejected the write.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl BrokerError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Ledger(LedgerError::Pool(PoolError::Exhausted { .. }))
        )
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// JSON input could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// An environment variable was present but malformed.
    #[error("environment variable {name}: {reason}")]
    Env {
        /// Variable name.
        name: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
