//! Task ledger backends.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryLedger;
pub use sqlite::SqliteLedger;
