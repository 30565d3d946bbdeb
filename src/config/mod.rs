//! Configuration models for the broker, its ledger and connection pool.

pub mod broker;
pub mod pool;

pub use broker::BrokerConfig;
pub use pool::{ConnectionPoolConfig, LedgerBackendConfig};
