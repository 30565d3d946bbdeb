//! The broker: single coordination point for agents and producers.
//!
//! Registry, pending queues and results form one aggregate behind one
//! `parking_lot::Mutex`. Every mutation and every snapshot read takes that
//! lock. Ledger writes are never made while it is held, so a slow ledger
//! (a pooled SQLite checkout waiting out its timeout) cannot stall heartbeats,
//! polls or waiters. Task completions, from posted results or from orphan
//! failures, are serialized by a separate `finish_order` lock taken before
//! either of the others, so the ledger and the result station agree on which
//! completion for a task landed last.
//!
//! `await_result` parks on a `Condvar` that `post_result` and orphan handling
//! signal, so a waiter wakes as soon as its result lands rather than on a
//! polling tick. Claims are single-shot: the first successful waiter removes
//! the result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::core::ledger::{TaskLedger, TaskRecord};
use crate::core::pending::{PendingQueues, PendingTask};
use crate::core::registry::{Agent, AgentRegistry, LiveAgent};
use crate::core::results::{ResultStation, TaskResult};
use crate::core::sweeper::SweepReport;
use crate::core::BrokerError;
use crate::infra::ledger::InMemoryLedger;
use crate::util::clock::{Clock, SystemClock, TimestampMs};
use crate::util::serde::{Payload, TaskId};

/// What happens to tasks still queued for an agent that is evicted or removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Discard the tasks. Their ledger records stay `pending`.
    #[default]
    Drop,
    /// Mark the tasks `failed` in the ledger and post a failure result, so
    /// producers blocked in `await_result` wake with an error payload.
    Fail,
}

/// Timing and policy knobs for a [`Broker`].
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// An agent is live while `now - last_seen <= heartbeat_timeout`.
    pub heartbeat_timeout: Duration,
    /// The sweeper evicts agents silent for longer than this.
    pub dead_threshold: Duration,
    /// The sweeper drops unclaimed results older than this.
    pub result_retention: Duration,
    /// Handling of tasks queued for departed agents.
    pub orphan_policy: OrphanPolicy,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(60),
            dead_threshold: Duration::from_secs(120),
            result_retention: Duration::from_secs(600),
            orphan_policy: OrphanPolicy::Drop,
        }
    }
}

/// Read-only counts for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStatus {
    /// Registered agents, live or not.
    pub registered_agents: usize,
    /// Live agents.
    pub live_agents: usize,
    /// Capability the `matching_agents` count was computed for.
    pub capability: Option<String>,
    /// Live agents with `capability` (all live agents when it is `None`).
    pub matching_agents: usize,
    /// Tasks queued across all agents.
    pub pending_tasks: usize,
    /// Results posted but not yet claimed.
    pub unclaimed_results: usize,
}

struct BrokerState {
    registry: AgentRegistry,
    queues: PendingQueues,
    results: ResultStation,
}

/// Capability-routed task broker.
pub struct Broker {
    settings: BrokerSettings,
    state: Mutex<BrokerState>,
    result_ready: Condvar,
    finish_order: Mutex<()>,
    ledger: Arc<dyn TaskLedger>,
    clock: Arc<dyn Clock>,
}

impl Broker {
    /// Create a broker writing to `ledger` and reading time from `clock`.
    pub fn new(settings: BrokerSettings, ledger: Arc<dyn TaskLedger>, clock: Arc<dyn Clock>) -> Self {
        info!(
            heartbeat_timeout_ms = settings.heartbeat_timeout.as_millis(),
            dead_threshold_ms = settings.dead_threshold.as_millis(),
            orphan_policy = ?settings.orphan_policy,
            "broker created"
        );
        Self {
            state: Mutex::new(BrokerState {
                registry: AgentRegistry::new(settings.heartbeat_timeout),
                queues: PendingQueues::new(),
                results: ResultStation::new(),
            }),
            settings,
            result_ready: Condvar::new(),
            finish_order: Mutex::new(()),
            ledger,
            clock,
        }
    }

    /// Broker with default settings, an in-memory ledger and the system clock.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(
            BrokerSettings::default(),
            Arc::new(InMemoryLedger::new(10_000)),
            Arc::new(SystemClock),
        )
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// The task ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn TaskLedger> {
        &self.ledger
    }

    fn now(&self) -> TimestampMs {
        self.clock.now_ms()
    }

    /// Register or re-register an agent. The latest capability set wins.
    ///
    /// Returns `true` if the id was already registered.
    pub fn register<I, S>(&self, agent_id: &str, display_name: &str, capabilities: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = self.now();
        let replaced = self
            .state
            .lock()
            .registry
            .register(agent_id, display_name, capabilities, now);
        if replaced {
            info!(agent_id = %agent_id, "agent re-registered");
        } else {
            info!(agent_id = %agent_id, display_name = %display_name, "agent registered");
        }
        replaced
    }

    /// Refresh an agent's liveness. `false` means the agent must register again.
    pub fn heartbeat(&self, agent_id: &str) -> bool {
        let now = self.now();
        let known = self.state.lock().registry.heartbeat(agent_id, now);
        if known {
            debug!(agent_id = %agent_id, "heartbeat");
        } else {
            debug!(agent_id = %agent_id, "heartbeat from unknown agent ignored");
        }
        known
    }

    /// Deregister an agent and purge its pending queue. Queued tasks are
    /// handled per the [`OrphanPolicy`]. Returns whether the agent was known.
    pub fn remove(&self, agent_id: &str) -> bool {
        let now = self.now();
        let _finishing = self.finish_order.lock();
        let (removed, orphans) = {
            let mut state = self.state.lock();
            let removed = state.registry.remove(agent_id).is_some();
            let orphans = state.queues.discard(agent_id);
            let orphans = self.orphan_results(&mut state, agent_id, orphans, now);
            (removed, orphans)
        };
        if removed {
            info!(agent_id = %agent_id, orphaned = orphans.len(), "agent removed");
        }
        self.settle_orphans(&orphans, now);
        removed
    }

    /// First live agent with `capability`, in registration order.
    #[must_use]
    pub fn find_live(&self, capability: Option<&str>) -> Option<Agent> {
        let now = self.now();
        self.state.lock().registry.find_live(capability, now).cloned()
    }

    /// All live agents with `capability`, with their idle time.
    #[must_use]
    pub fn list_live(&self, capability: Option<&str>) -> Vec<LiveAgent> {
        let now = self.now();
        self.state.lock().registry.list_live(capability, now)
    }

    /// Route a task to the first live agent with `capability` and queue it.
    ///
    /// The agent is chosen under the aggregate lock, the ledger record is
    /// written with the lock released, and the task is queued under the lock
    /// again. If the chosen agent was removed in between, the record is marked
    /// failed and the submission is refused.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::NoAgentAvailable`] if no live agent matches, or the
    ///   chosen one left before the task could be queued; nothing is queued
    /// - [`BrokerError::Ledger`] if the ledger write fails; nothing is queued
    pub fn submit(
        &self,
        task_type: &str,
        payload: Payload,
        capability: Option<&str>,
    ) -> Result<TaskId, BrokerError> {
        let now = self.now();
        let no_agent = || BrokerError::NoAgentAvailable {
            capability: capability.map(str::to_owned),
        };

        let routed = self
            .state
            .lock()
            .registry
            .find_live(capability, now)
            .map(|agent| agent.id.clone());
        let Some(agent_id) = routed else {
            warn!(
                task_type = %task_type,
                capability = capability.unwrap_or("*"),
                "no live agent for submission"
            );
            return Err(no_agent());
        };

        let task_id = TaskId::generate();
        let record = TaskRecord::pending(task_id, agent_id.as_str(), task_type, payload.clone(), now);
        self.ledger.record(&record)?;

        let mut state = self.state.lock();
        if !state.registry.contains(&agent_id) {
            drop(state);
            warn!(task_id = %task_id, agent_id = %agent_id, "agent left before task could be queued");
            let failure = json!({ "error": "agent_departed", "agent_id": agent_id });
            if let Err(e) = self.ledger.mark_finished(&task_id, false, &failure, now) {
                warn!(task_id = %task_id, error = %e, "failed to record refused task");
            }
            return Err(no_agent());
        }
        state.queues.push(
            &agent_id,
            PendingTask {
                task_id,
                task_type: task_type.to_owned(),
                payload,
            },
        );
        let depth = state.queues.depth(&agent_id);
        drop(state);

        info!(task_id = %task_id, agent_id = %agent_id, task_type = %task_type, depth, "task queued");
        Ok(task_id)
    }

    /// Hand the agent everything queued for it, oldest first, and forget it.
    ///
    /// # Errors
    ///
    /// [`BrokerError::UnknownAgent`] if the agent is not registered.
    pub fn poll_pending(&self, agent_id: &str) -> Result<Vec<PendingTask>, BrokerError> {
        let now = self.now();
        let tasks = {
            let mut state = self.state.lock();
            if !state.registry.contains(agent_id) {
                return Err(BrokerError::UnknownAgent(agent_id.to_owned()));
            }
            state.queues.drain(agent_id)
        };

        if !tasks.is_empty() {
            let ids: Vec<TaskId> = tasks.iter().map(|t| t.task_id).collect();
            if let Err(e) = self.ledger.mark_dispatched(&ids, now) {
                warn!(agent_id = %agent_id, error = %e, "failed to mark tasks dispatched");
            }
            debug!(agent_id = %agent_id, count = tasks.len(), "delivered pending tasks");
        }
        Ok(tasks)
    }

    /// Store a task's result and wake anyone waiting on it. A repeated post
    /// replaces an unclaimed earlier result; concurrent posts for one task
    /// land in the ledger and the result station in the same order.
    pub fn post_result(&self, task_id: TaskId, success: bool, payload: Payload) {
        let now = self.now();
        let finishing = self.finish_order.lock();

        match self.ledger.mark_finished(&task_id, success, &payload, now) {
            Ok(true) => {}
            Ok(false) => warn!(task_id = %task_id, "result posted for task missing from ledger"),
            Err(e) => warn!(task_id = %task_id, error = %e, "failed to record result in ledger"),
        }

        let replaced = self.state.lock().results.store(TaskResult {
            task_id,
            success,
            payload,
            completed_at_ms: now,
        });
        drop(finishing);
        self.result_ready.notify_all();

        if replaced {
            debug!(task_id = %task_id, "overwrote unclaimed result");
        }
        info!(task_id = %task_id, success, "result posted");
    }

    /// Block until the task's result is available, then claim it.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Timeout`] if nothing arrives within `timeout`. A result
    /// that arrives later stays unclaimed until the sweeper reaps it.
    pub fn await_result(&self, task_id: TaskId, timeout: Duration) -> Result<TaskResult, BrokerError> {
        let started = Instant::now();
        // `None` when the timeout is too large to represent: wait without a deadline.
        let deadline = started.checked_add(timeout);
        let mut state = self.state.lock();

        loop {
            if let Some(result) = state.results.take(&task_id) {
                debug!(task_id = %task_id, waited_ms = started.elapsed().as_millis(), "result claimed");
                return Ok(result);
            }
            let timed_out = match deadline {
                Some(deadline) => self.result_ready.wait_until(&mut state, deadline).timed_out(),
                None => {
                    self.result_ready.wait(&mut state);
                    false
                }
            };
            if timed_out {
                if let Some(result) = state.results.take(&task_id) {
                    return Ok(result);
                }
                let waited = started.elapsed();
                debug!(task_id = %task_id, waited_ms = waited.as_millis(), "await timed out");
                return Err(BrokerError::Timeout { task_id, waited });
            }
        }
    }

    /// One liveness pass: evict dead agents with their queues, then drop
    /// results older than the retention window.
    pub fn sweep(&self) -> SweepReport {
        let now = self.now();
        let _finishing = self.finish_order.lock();
        let (report, orphans) = {
            let mut state = self.state.lock();
            let dead = state.registry.evict_dead(self.settings.dead_threshold, now);
            let reaped_results = state.results.reap_older_than(self.settings.result_retention, now);

            let mut orphans = Vec::new();
            for agent in &dead {
                let queued = state.queues.discard(&agent.id);
                orphans.extend(self.orphan_results(&mut state, &agent.id, queued, now));
            }
            let report = SweepReport {
                evicted_agents: dead.into_iter().map(|a| a.id).collect(),
                orphaned_tasks: orphans.len(),
                reaped_results,
            };
            (report, orphans)
        };

        for agent_id in &report.evicted_agents {
            info!(agent_id = %agent_id, "evicted agent after missed heartbeats");
        }
        self.settle_orphans(&orphans, now);
        report
    }

    /// Apply the orphan policy to tasks purged from `agent_id`'s queue while
    /// the aggregate lock is held. Returns the failure results posted, whose
    /// ledger updates happen after the lock is released.
    fn orphan_results(
        &self,
        state: &mut BrokerState,
        agent_id: &str,
        orphans: Vec<PendingTask>,
        now: TimestampMs,
    ) -> Vec<TaskResult> {
        if orphans.is_empty() {
            return Vec::new();
        }
        match self.settings.orphan_policy {
            OrphanPolicy::Drop => {
                warn!(agent_id = %agent_id, dropped = orphans.len(), "dropped tasks queued for departed agent");
                Vec::new()
            }
            OrphanPolicy::Fail => orphans
                .into_iter()
                .map(|task| {
                    let result = TaskResult {
                        task_id: task.task_id,
                        success: false,
                        payload: json!({ "error": "agent_departed", "agent_id": agent_id }),
                        completed_at_ms: now,
                    };
                    state.results.store(result.clone());
                    result
                })
                .collect(),
        }
    }

    fn settle_orphans(&self, failed: &[TaskResult], now: TimestampMs) {
        if failed.is_empty() {
            return;
        }
        self.result_ready.notify_all();
        for result in failed {
            if let Err(e) = self.ledger.mark_finished(&result.task_id, false, &result.payload, now) {
                warn!(task_id = %result.task_id, error = %e, "failed to record orphaned task");
            }
        }
        info!(failed = failed.len(), "failed tasks queued for departed agent");
    }

    /// Counts for observability, optionally for one capability.
    #[must_use]
    pub fn status(&self, capability: Option<&str>) -> BrokerStatus {
        let now = self.now();
        let state = self.state.lock();
        BrokerStatus {
            registered_agents: state.registry.len(),
            live_agents: state.registry.count_live(None, now),
            capability: capability.map(str::to_owned),
            matching_agents: state.registry.count_live(capability, now),
            pending_tasks: state.queues.total(),
            unclaimed_results: state.results.len(),
        }
    }

    /// Tasks currently queued for one agent.
    #[must_use]
    pub fn pending_depth(&self, agent_id: &str) -> usize {
        self.state.lock().queues.depth(agent_id)
    }

    /// Whether `agent_id` still has a pending queue.
    #[must_use]
    pub fn has_pending_queue(&self, agent_id: &str) -> bool {
        self.state.lock().queues.has_queue(agent_id)
    }

    /// Registered agent record, live or not.
    #[must_use]
    pub fn agent(&self, agent_id: &str) -> Option<Agent> {
        self.state.lock().registry.get(agent_id).cloned()
    }
}
