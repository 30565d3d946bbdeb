//! Connection managers for [`crate::core::ResourcePool`].

pub mod sqlite;

pub use sqlite::SqliteConnectionManager;
