//! Background liveness sweeper.
//!
//! Each tick runs [`Broker::sweep`]: agents silent past the dead threshold
//! are evicted along with their pending queues, and results older than the
//! retention window are dropped whether or not anyone claimed them.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::background::BackgroundTask;
use crate::core::Broker;
use crate::util::serde::AgentId;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Agents evicted for missed heartbeats.
    pub evicted_agents: Vec<AgentId>,
    /// Queued tasks failed under `OrphanPolicy::Fail`. Always zero under `Drop`.
    pub orphaned_tasks: usize,
    /// Results dropped for age.
    pub reaped_results: usize,
}

impl SweepReport {
    /// Whether the pass changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.evicted_agents.is_empty() && self.orphaned_tasks == 0 && self.reaped_results == 0
    }
}

/// Handle to the running sweeper thread. Stops on drop.
pub struct LivenessSweeper {
    task: BackgroundTask,
}

impl LivenessSweeper {
    /// Start sweeping `broker` every `interval`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the sweeper thread could not be spawned.
    pub fn spawn(broker: Arc<Broker>, interval: Duration) -> std::io::Result<Self> {
        let task = BackgroundTask::spawn("broker-liveness-sweeper", interval, move || {
            let report = broker.sweep();
            if !report.is_empty() {
                info!(
                    evicted = report.evicted_agents.len(),
                    orphaned = report.orphaned_tasks,
                    reaped_results = report.reaped_results,
                    "liveness sweep"
                );
            }
        })?;
        Ok(Self { task })
    }

    /// Whether the sweeper thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Stop sweeping and join the thread.
    pub fn stop(&mut self) {
        self.task.stop();
    }
}
