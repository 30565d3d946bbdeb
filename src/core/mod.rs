//! Broker core: registry, queues, results, ledger contract, and the
//! connection pool that backs durable storage.

pub mod background;
pub mod broker;
pub mod error;
pub mod ledger;
pub mod pending;
pub mod registry;
pub mod resource_pool;
pub mod results;
pub mod sweeper;

pub use background::BackgroundTask;
pub use broker::{Broker, BrokerSettings, BrokerStatus, OrphanPolicy};
pub use error::{AppResult, BrokerError, ConfigError, LedgerError, PoolError};
pub use ledger::{LedgerCounts, TaskLedger, TaskRecord, TaskStatus};
pub use pending::{PendingQueues, PendingTask};
pub use registry::{Agent, AgentRegistry, LiveAgent};
pub use resource_pool::{ConnectionManager, PoolLimits, PoolStats, PooledConnection, ResourcePool};
pub use results::{ResultStation, TaskResult};
pub use sweeper::{LivenessSweeper, SweepReport};
