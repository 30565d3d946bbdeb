//! Infrastructure adapters: ledger backends and storage connection managers.

pub mod ledger;
pub mod pool;

pub use ledger::{InMemoryLedger, SqliteLedger};
pub use pool::SqliteConnectionManager;
