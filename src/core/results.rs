//! Results posted by agents, held until claimed once or reaped by age.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::clock::{duration_ms, TimestampMs};
use crate::util::serde::{Payload, TaskId};

/// Outcome reported for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Task this result belongs to.
    pub task_id: TaskId,
    /// Whether the agent reported success.
    pub success: bool,
    /// Result payload (or error details on failure).
    pub payload: Payload,
    /// When the result was posted.
    pub completed_at_ms: TimestampMs,
}

/// Unclaimed results keyed by task id.
#[derive(Debug, Default, Clone)]
pub struct ResultStation {
    results: HashMap<TaskId, TaskResult>,
}

impl ResultStation {
    /// Create an empty station.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a result, replacing any earlier one for the same task.
    ///
    /// Returns `true` if an unclaimed result was overwritten.
    pub fn store(&mut self, result: TaskResult) -> bool {
        self.results.insert(result.task_id, result).is_some()
    }

    /// Claim a result. A claimed result is gone; a second claim finds nothing.
    pub fn take(&mut self, task_id: &TaskId) -> Option<TaskResult> {
        self.results.remove(task_id)
    }

    /// Whether a result is waiting for `task_id`.
    #[must_use]
    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.results.contains_key(task_id)
    }

    /// Drop results posted more than `retention` ago. Returns how many.
    pub fn reap_older_than(&mut self, retention: Duration, now_ms: TimestampMs) -> usize {
        let retention_ms = duration_ms(retention);
        let before = self.results.len();
        self.results
            .retain(|_, r| now_ms.saturating_sub(r.completed_at_ms) <= retention_ms);
        before - self.results.len()
    }

    /// Unclaimed results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether nothing is waiting to be claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
