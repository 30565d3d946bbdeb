//! Durable task log used for audit and inspection.
//!
//! The ledger is written alongside the live hand-off path but never read by
//! it: routing state lives in memory and starts empty on every process start.
//! Backends live in `crate::infra::ledger`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::LedgerError;
use crate::util::clock::TimestampMs;
use crate::util::serde::{AgentId, Payload, TaskId};

/// Lifecycle of a task in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued for an agent, not yet picked up.
    Pending,
    /// Handed to the agent by a poll.
    Dispatched,
    /// Agent reported success.
    Completed,
    /// Agent reported failure, or the task was orphaned under `OrphanPolicy::Fail`.
    Failed,
}

impl TaskStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed or failed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "dispatched" => Ok(Self::Dispatched),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(LedgerError::Storage(format!("unknown task status `{other}`"))),
        }
    }
}

/// One task as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task identifier.
    pub id: TaskId,
    /// Agent the task was routed to.
    pub target_agent_id: AgentId,
    /// Task type.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Submitted payload.
    pub payload: Payload,
    /// Current status.
    pub status: TaskStatus,
    /// Submission time.
    pub created_at_ms: TimestampMs,
    /// When the agent picked it up.
    pub assigned_at_ms: Option<TimestampMs>,
    /// When a result was posted.
    pub completed_at_ms: Option<TimestampMs>,
    /// Last posted result payload.
    pub result: Option<Payload>,
}

impl TaskRecord {
    /// A freshly submitted task.
    #[must_use]
    pub fn pending(
        id: TaskId,
        target_agent_id: impl Into<AgentId>,
        task_type: impl Into<String>,
        payload: Payload,
        created_at_ms: TimestampMs,
    ) -> Self {
        Self {
            id,
            target_agent_id: target_agent_id.into(),
            task_type: task_type.into(),
            payload,
            status: TaskStatus::Pending,
            created_at_ms,
            assigned_at_ms: None,
            completed_at_ms: None,
            result: None,
        }
    }

    /// Move `pending` to `dispatched`. Other states are left alone.
    pub fn apply_dispatch(&mut self, at_ms: TimestampMs) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::Dispatched;
        self.assigned_at_ms = Some(at_ms);
        true
    }

    /// Record a result. Later results overwrite earlier ones.
    pub fn apply_finish(&mut self, success: bool, result: Payload, at_ms: TimestampMs) {
        self.status = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        self.completed_at_ms = Some(at_ms);
        self.result = Some(result);
    }
}

/// Number of ledger records in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCounts {
    /// Waiting for pickup.
    pub pending: u64,
    /// Picked up, no result yet.
    pub dispatched: u64,
    /// Finished successfully.
    pub completed: u64,
    /// Finished unsuccessfully.
    pub failed: u64,
}

impl LedgerCounts {
    /// Add one record in `status`.
    pub fn bump(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Dispatched => self.dispatched += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }

    /// All records.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.pending + self.dispatched + self.completed + self.failed
    }
}

/// Durable task log abstraction.
pub trait TaskLedger: Send + Sync {
    /// Write a newly submitted task.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the backend rejects the write.
    fn record(&self, task: &TaskRecord) -> Result<(), LedgerError>;

    /// Mark pending tasks as dispatched. Returns how many changed.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the backend rejects the write.
    fn mark_dispatched(&self, ids: &[TaskId], at_ms: TimestampMs) -> Result<usize, LedgerError>;

    /// Record a result. Returns `false` if the task is not in the ledger.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the backend rejects the write.
    fn mark_finished(
        &self,
        id: &TaskId,
        success: bool,
        result: &Payload,
        at_ms: TimestampMs,
    ) -> Result<bool, LedgerError>;

    /// Fetch one record.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the backend read fails.
    fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>, LedgerError>;

    /// Records in submission order, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the backend read fails.
    fn list(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<TaskRecord>, LedgerError>;

    /// Record counts per status.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the backend read fails.
    fn counts(&self) -> Result<LedgerCounts, LedgerError>;
}
