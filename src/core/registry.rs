//! Connected agents, their capabilities, and liveness.
//!
//! The registry is plain data; the broker serializes access to it under its
//! aggregate lock and passes the current time in. Iteration order is
//! registration order and is the routing tie-break: the first live match wins.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::clock::{duration_ms, TimestampMs};
use crate::util::serde::AgentId;

/// A registered worker agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Agent-chosen identifier.
    pub id: AgentId,
    /// Human-readable name.
    pub display_name: String,
    /// Classes of work the agent accepts.
    pub capabilities: BTreeSet<String>,
    /// Last register or heartbeat.
    pub last_seen_ms: TimestampMs,
    /// When the current registration was made.
    pub registered_at_ms: TimestampMs,
}

impl Agent {
    /// Time since the last heartbeat.
    #[must_use]
    pub const fn idle_ms(&self, now_ms: TimestampMs) -> u64 {
        now_ms.saturating_sub(self.last_seen_ms)
    }

    /// Whether the agent advertises `capability` (always true for `None`).
    #[must_use]
    pub fn can(&self, capability: Option<&str>) -> bool {
        capability.is_none_or(|c| self.capabilities.contains(c))
    }
}

/// A live agent together with how long it has been silent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveAgent {
    /// The agent record.
    pub agent: Agent,
    /// `now - last_seen`.
    pub idle_for: Duration,
}

/// Registered agents in registration order.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: Vec<Agent>,
    heartbeat_timeout_ms: u64,
}

impl AgentRegistry {
    /// Create an empty registry. Agents silent for longer than
    /// `heartbeat_timeout` are not live.
    #[must_use]
    pub fn new(heartbeat_timeout: Duration) -> Self {
        Self {
            agents: Vec::new(),
            heartbeat_timeout_ms: duration_ms(heartbeat_timeout),
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.agents.iter().position(|a| a.id == id)
    }

    fn is_live(&self, agent: &Agent, now_ms: TimestampMs) -> bool {
        agent.idle_ms(now_ms) <= self.heartbeat_timeout_ms
    }

    /// Insert or overwrite an agent. An existing agent keeps its place in
    /// routing order but its name and capabilities are replaced.
    ///
    /// Returns `true` if the id was already registered.
    pub fn register<I, S>(&mut self, id: &str, display_name: &str, capabilities: I, now_ms: TimestampMs) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let agent = Agent {
            id: id.to_owned(),
            display_name: display_name.to_owned(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            last_seen_ms: now_ms,
            registered_at_ms: now_ms,
        };
        if let Some(idx) = self.position(id) {
            self.agents[idx] = agent;
            true
        } else {
            self.agents.push(agent);
            false
        }
    }

    /// Refresh `last_seen`. Returns `false` for unknown ids, which are ignored.
    pub fn heartbeat(&mut self, id: &str, now_ms: TimestampMs) -> bool {
        self.agents.iter_mut().find(|a| a.id == id).is_some_and(|agent| {
            agent.last_seen_ms = now_ms;
            true
        })
    }

    /// Deregister an agent, returning its record if it was known.
    pub fn remove(&mut self, id: &str) -> Option<Agent> {
        self.position(id).map(|idx| self.agents.remove(idx))
    }

    /// Look up an agent regardless of liveness.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Whether `id` is registered, live or not.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// First live agent, in registration order, that has `capability`.
    #[must_use]
    pub fn find_live(&self, capability: Option<&str>, now_ms: TimestampMs) -> Option<&Agent> {
        self.agents
            .iter()
            .find(|a| self.is_live(a, now_ms) && a.can(capability))
    }

    /// Every live agent that has `capability`, with its idle time.
    #[must_use]
    pub fn list_live(&self, capability: Option<&str>, now_ms: TimestampMs) -> Vec<LiveAgent> {
        self.agents
            .iter()
            .filter(|a| self.is_live(a, now_ms) && a.can(capability))
            .map(|a| LiveAgent {
                agent: a.clone(),
                idle_for: Duration::from_millis(a.idle_ms(now_ms)),
            })
            .collect()
    }

    /// Remove every agent silent for longer than `dead_threshold`.
    pub fn evict_dead(&mut self, dead_threshold: Duration, now_ms: TimestampMs) -> Vec<Agent> {
        let threshold_ms = duration_ms(dead_threshold);
        let (dead, alive): (Vec<_>, Vec<_>) = std::mem::take(&mut self.agents)
            .into_iter()
            .partition(|a| a.idle_ms(now_ms) > threshold_ms);
        self.agents = alive;
        dead
    }

    /// Number of registered agents, live or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agents are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Number of live agents with `capability`.
    #[must_use]
    pub fn count_live(&self, capability: Option<&str>, now_ms: TimestampMs) -> usize {
        self.agents
            .iter()
            .filter(|a| self.is_live(a, now_ms) && a.can(capability))
            .count()
    }
}
