//! Per-agent FIFO of tasks waiting to be picked up.
//!
//! Delivery is drain-on-read: [`PendingQueues::drain`] hands out everything
//! queued for an agent, in submission order, and forgets it. A delivered task
//! is never handed out again, whether or not the agent runs it.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::util::serde::{AgentId, Payload, TaskId};

/// The part of a task an agent needs to run it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTask {
    /// Task identifier to report the result under.
    pub task_id: TaskId,
    /// Task type, e.g. `"download"`.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Opaque payload.
    pub payload: Payload,
}

/// Pending queues keyed by agent.
#[derive(Debug, Default, Clone)]
pub struct PendingQueues {
    queues: HashMap<AgentId, VecDeque<PendingTask>>,
}

impl PendingQueues {
    /// Create an empty set of queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task to the back of `agent_id`'s queue.
    pub fn push(&mut self, agent_id: &str, task: PendingTask) {
        self.queues.entry(agent_id.to_owned()).or_default().push_back(task);
    }

    /// Take everything queued for `agent_id`, oldest first.
    pub fn drain(&mut self, agent_id: &str) -> Vec<PendingTask> {
        self.queues
            .remove(agent_id)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Drop `agent_id`'s queue, returning what was in it.
    pub fn discard(&mut self, agent_id: &str) -> Vec<PendingTask> {
        self.drain(agent_id)
    }

    /// Tasks waiting for `agent_id`.
    #[must_use]
    pub fn depth(&self, agent_id: &str) -> usize {
        self.queues.get(agent_id).map_or(0, VecDeque::len)
    }

    /// Whether `agent_id` has a queue at all.
    #[must_use]
    pub fn has_queue(&self, agent_id: &str) -> bool {
        self.queues.contains_key(agent_id)
    }

    /// Tasks waiting across all agents.
    #[must_use]
    pub fn total(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}
