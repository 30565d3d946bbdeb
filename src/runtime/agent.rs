//! In-process agent that speaks the agent side of the broker contract.
//!
//! Runs on its own OS thread with a current-thread tokio runtime: it
//! registers, heartbeats on a fixed interval, polls its queue, runs each task
//! through a [`TaskHandler`], and posts the outcome. If the broker forgets it
//! (eviction, explicit removal) it registers again on the next tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use crate::core::{Broker, BrokerError, PendingTask};
use crate::util::serde::{AgentId, Payload};

/// Executes tasks delivered to an [`AgentRunner`].
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Run one task. `Ok` posts a success result, `Err` a failure result.
    async fn handle(&self, task: PendingTask) -> Result<Payload, Payload>;
}

/// Identity and timing for an [`AgentRunner`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent id to register under.
    pub agent_id: AgentId,
    /// Human-readable name.
    pub display_name: String,
    /// Capabilities to advertise.
    pub capabilities: Vec<String>,
    /// How often the queue is polled.
    pub poll_interval: Duration,
    /// How often a heartbeat is sent. Keep it under the broker's heartbeat timeout.
    pub heartbeat_interval: Duration,
}

impl AgentConfig {
    /// Config with a 100 ms poll and a 15 s heartbeat.
    pub fn new<I, S>(agent_id: impl Into<AgentId>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let agent_id = agent_id.into();
        Self {
            display_name: agent_id.clone(),
            agent_id,
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            poll_interval: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(15),
        }
    }

    /// Override the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Override the heartbeat interval.
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }
}

/// Handle to a running in-process agent. Deregisters and joins on drop.
pub struct AgentRunner {
    agent_id: AgentId,
    broker: Arc<Broker>,
    processed: Arc<AtomicU64>,
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl AgentRunner {
    /// Register with `broker` and start serving tasks.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the agent thread could not be spawned.
    pub fn spawn<H: TaskHandler>(broker: Arc<Broker>, config: AgentConfig, handler: H) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let processed = Arc::new(AtomicU64::new(0));
        let agent_id = config.agent_id.clone();

        broker.register(&config.agent_id, &config.display_name, config.capabilities.clone());

        let thread_broker = Arc::clone(&broker);
        let thread_processed = Arc::clone(&processed);
        let handle = thread::Builder::new()
            .name(format!("broker-agent-{agent_id}"))
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!(agent_id = %config.agent_id, error = %e, "failed to create agent runtime");
                        return;
                    }
                };
                let mut last_heartbeat = Instant::now();

                loop {
                    match shutdown_rx.recv_timeout(config.poll_interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    if last_heartbeat.elapsed() >= config.heartbeat_interval {
                        last_heartbeat = Instant::now();
                        if !thread_broker.heartbeat(&config.agent_id) {
                            reregister(&thread_broker, &config);
                        }
                    }

                    let tasks = match thread_broker.poll_pending(&config.agent_id) {
                        Ok(tasks) => tasks,
                        Err(BrokerError::UnknownAgent(_)) => {
                            reregister(&thread_broker, &config);
                            continue;
                        }
                        Err(e) => {
                            warn!(agent_id = %config.agent_id, error = %e, "poll failed");
                            continue;
                        }
                    };

                    for task in tasks {
                        let task_id = task.task_id;
                        debug!(agent_id = %config.agent_id, task_id = %task_id, "agent executing task");
                        let (success, payload) = match rt.block_on(handler.handle(task)) {
                            Ok(payload) => (true, payload),
                            Err(payload) => (false, payload),
                        };
                        thread_broker.post_result(task_id, success, payload);
                        thread_processed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                debug!(agent_id = %config.agent_id, "agent thread exiting");
            })?;

        info!(agent_id = %agent_id, "agent runner started");
        Ok(Self {
            agent_id,
            broker,
            processed,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Agent id.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Tasks executed and reported so far.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Stop serving, join the thread and deregister. Idempotent.
    pub fn stop(&mut self) {
        let Some(tx) = self.shutdown_tx.take() else {
            return;
        };
        drop(tx);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(agent_id = %self.agent_id, "agent thread panicked");
            }
        }
        self.broker.remove(&self.agent_id);
        info!(agent_id = %self.agent_id, processed = self.processed(), "agent runner stopped");
    }
}

impl Drop for AgentRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn reregister(broker: &Broker, config: &AgentConfig) {
    info!(agent_id = %config.agent_id, "broker forgot agent; registering again");
    broker.register(&config.agent_id, &config.display_name, config.capabilities.clone());
}
