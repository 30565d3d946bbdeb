//! SQLite-backed durable ledger running on the connection pool.
//!
//! Every operation checks a connection out of the shared [`ResourcePool`],
//! uses it, and returns it when the guard drops, including on error paths.
//! A pool that stays exhausted past the acquire timeout surfaces as
//! [`LedgerError::Pool`].

use std::time::Duration;

use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};

use crate::core::ledger::{LedgerCounts, TaskLedger, TaskRecord, TaskStatus};
use crate::core::{LedgerError, PooledConnection, ResourcePool};
use crate::infra::pool::SqliteConnectionManager;
use crate::util::clock::TimestampMs;
use crate::util::serde::{Payload, TaskId};

const SELECT_COLUMNS: &str = "SELECT id, target_agent_id, task_type, payload, status, \
     created_at_ms, assigned_at_ms, completed_at_ms, result FROM broker_tasks";

/// Durable ledger stored in a SQLite database.
pub struct SqliteLedger {
    pool: ResourcePool<SqliteConnectionManager>,
    acquire_timeout: Duration,
}

impl SqliteLedger {
    /// Wrap a pool and run the schema migration.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if no connection can be acquired or the
    /// migration fails.
    pub fn new(
        pool: ResourcePool<SqliteConnectionManager>,
        acquire_timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let ledger = Self {
            pool,
            acquire_timeout,
        };
        ledger.migrate()?;
        info!(path = %ledger.pool.manager().path().display(), "sqlite ledger ready");
        Ok(ledger)
    }

    /// SQL migration statements for the task ledger.
    #[must_use]
    pub const fn migrations() -> &'static [&'static str] {
        &[r"
CREATE TABLE IF NOT EXISTS broker_tasks (
    id TEXT PRIMARY KEY,
    target_agent_id TEXT NOT NULL,
    task_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('pending', 'dispatched', 'completed', 'failed')),
    created_at_ms INTEGER NOT NULL,
    assigned_at_ms INTEGER,
    completed_at_ms INTEGER,
    result TEXT
);
CREATE INDEX IF NOT EXISTS idx_broker_tasks_status ON broker_tasks (status, created_at_ms);
CREATE INDEX IF NOT EXISTS idx_broker_tasks_agent ON broker_tasks (target_agent_id);
"]
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &ResourcePool<SqliteConnectionManager> {
        &self.pool
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, LedgerError> {
        Ok(self.pool.acquire(self.acquire_timeout)?)
    }

    fn migrate(&self) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        for sql in Self::migrations() {
            conn.execute_batch(sql).map_err(storage("migrate"))?;
        }
        debug!("ledger migrations applied");
        Ok(())
    }
}

fn storage(context: &'static str) -> impl Fn(rusqlite::Error) -> LedgerError {
    move |e| LedgerError::Storage(format!("{context}: {e}"))
}

fn to_sql_ts(ms: TimestampMs) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

fn from_sql_ts(v: i64) -> TimestampMs {
    u64::try_from(v).unwrap_or_default()
}

/// Row as stored, before parsing ids, statuses and JSON.
struct RawRecord {
    id: String,
    target_agent_id: String,
    task_type: String,
    payload: String,
    status: String,
    created_at_ms: i64,
    assigned_at_ms: Option<i64>,
    completed_at_ms: Option<i64>,
    result: Option<String>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            target_agent_id: row.get(1)?,
            task_type: row.get(2)?,
            payload: row.get(3)?,
            status: row.get(4)?,
            created_at_ms: row.get(5)?,
            assigned_at_ms: row.get(6)?,
            completed_at_ms: row.get(7)?,
            result: row.get(8)?,
        })
    }
}

impl TryFrom<RawRecord> for TaskRecord {
    type Error = LedgerError;

    fn try_from(raw: RawRecord) -> Result<Self, Self::Error> {
        let id = raw
            .id
            .parse::<TaskId>()
            .map_err(|e| LedgerError::Storage(format!("bad task id `{}`: {e}", raw.id)))?;
        let result = raw
            .result
            .as_deref()
            .map(serde_json::from_str::<Payload>)
            .transpose()?;
        Ok(Self {
            id,
            target_agent_id: raw.target_agent_id,
            task_type: raw.task_type,
            payload: serde_json::from_str(&raw.payload)?,
            status: raw.status.parse()?,
            created_at_ms: from_sql_ts(raw.created_at_ms),
            assigned_at_ms: raw.assigned_at_ms.map(from_sql_ts),
            completed_at_ms: raw.completed_at_ms.map(from_sql_ts),
            result,
        })
    }
}

impl TaskLedger for SqliteLedger {
    fn record(&self, task: &TaskRecord) -> Result<(), LedgerError> {
        let payload = serde_json::to_string(&task.payload)?;
        let result = task.result.as_ref().map(serde_json::to_string).transpose()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO broker_tasks (id, target_agent_id, task_type, payload, status, \
             created_at_ms, assigned_at_ms, completed_at_ms, result) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                task.id.to_string(),
                task.target_agent_id,
                task.task_type,
                payload,
                task.status.as_str(),
                to_sql_ts(task.created_at_ms),
                task.assigned_at_ms.map(to_sql_ts),
                task.completed_at_ms.map(to_sql_ts),
                result,
            ],
        )
        .map_err(storage("insert task"))?;
        Ok(())
    }

    fn mark_dispatched(&self, ids: &[TaskId], at_ms: TimestampMs) -> Result<usize, LedgerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(storage("begin dispatch"))?;
        let mut changed = 0;
        for id in ids {
            changed += tx
                .execute(
                    "UPDATE broker_tasks SET status = 'dispatched', assigned_at_ms = ?1 \
                     WHERE id = ?2 AND status = 'pending'",
                    params![to_sql_ts(at_ms), id.to_string()],
                )
                .map_err(storage("mark dispatched"))?;
        }
        tx.commit().map_err(storage("commit dispatch"))?;
        Ok(changed)
    }

    fn mark_finished(
        &self,
        id: &TaskId,
        success: bool,
        result: &Payload,
        at_ms: TimestampMs,
    ) -> Result<bool, LedgerError> {
        let status = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        let result = serde_json::to_string(result)?;
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE broker_tasks SET status = ?1, completed_at_ms = ?2, result = ?3 WHERE id = ?4",
                params![status.as_str(), to_sql_ts(at_ms), result, id.to_string()],
            )
            .map_err(storage("mark finished"))?;
        Ok(changed > 0)
    }

    fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>, LedgerError> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.to_string()],
                RawRecord::from_row,
            )
            .optional()
            .map_err(storage("get task"))?;
        raw.map(TaskRecord::try_from).transpose()
    }

    fn list(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<TaskRecord>, LedgerError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.conn()?;
        let raws = if let Some(status) = status {
            let mut stmt = conn
                .prepare(&format!(
                    "{SELECT_COLUMNS} WHERE status = ?1 ORDER BY created_at_ms, rowid LIMIT ?2"
                ))
                .map_err(storage("prepare list"))?;
            let rows = stmt
                .query_map(params![status.as_str(), limit], RawRecord::from_row)
                .map_err(storage("list tasks"))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage("read task"))?
        } else {
            let mut stmt = conn
                .prepare(&format!("{SELECT_COLUMNS} ORDER BY created_at_ms, rowid LIMIT ?1"))
                .map_err(storage("prepare list"))?;
            let rows = stmt
                .query_map(params![limit], RawRecord::from_row)
                .map_err(storage("list tasks"))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage("read task"))?
        };
        raws.into_iter().map(TaskRecord::try_from).collect()
    }

    fn counts(&self) -> Result<LedgerCounts, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM broker_tasks GROUP BY status")
            .map_err(storage("prepare counts"))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(storage("count tasks"))?;

        let mut counts = LedgerCounts::default();
        for row in rows {
            let (status, n) = row.map_err(storage("read count"))?;
            let n = u64::try_from(n).unwrap_or_default();
            match status.parse::<TaskStatus>()? {
                TaskStatus::Pending => counts.pending = n,
                TaskStatus::Dispatched => counts.dispatched = n,
                TaskStatus::Completed => counts.completed = n,
                TaskStatus::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }
}
