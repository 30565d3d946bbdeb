//! SQLite connection manager.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;

use crate::core::ConnectionManager;

/// Opens connections to one SQLite database file.
///
/// Every pooled connection opens the same file, so in-memory databases are
/// not supported here: each connection would see its own empty database.
#[derive(Debug, Clone)]
pub struct SqliteConnectionManager {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteConnectionManager {
    /// Manager for the database at `path`, created on first connect.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// How long a connection waits on a locked database before failing.
    #[must_use]
    pub const fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// Database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConnectionManager for SqliteConnectionManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn is_valid(&self, conn: &mut Connection) -> bool {
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }
}
