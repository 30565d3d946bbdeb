//! Request/response models for the producer and agent contract.
//!
//! These are transport-neutral: an HTTP or RPC layer deserializes a request,
//! calls the matching handler, and serializes what comes back. Failures map
//! to [`ApiError`], which carries a stable machine-readable code.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{
    Broker, BrokerError, BrokerStatus, LedgerCounts, LedgerError, PendingTask, PoolError,
    TaskResult,
};
use crate::util::clock::TimestampMs;
use crate::util::serde::{AgentId, Payload, TaskId};

/// Agent registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Agent-chosen identifier.
    pub agent_id: AgentId,
    /// Human-readable name.
    #[serde(default)]
    pub display_name: String,
    /// Capabilities the agent accepts.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Registration outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Registered agent.
    pub agent_id: AgentId,
    /// Whether an earlier registration was overwritten.
    pub replaced: bool,
}

/// Heartbeat outcome. `known == false` means the agent must register again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// Whether the agent was registered.
    pub known: bool,
}

/// Task submission from a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Task type.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Opaque payload.
    #[serde(default)]
    pub payload: Payload,
    /// Capability the executing agent must have. `None` matches any live agent.
    #[serde(default)]
    pub capability: Option<String>,
}

/// Accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Id to await the result under.
    pub task_id: TaskId,
}

/// Tasks handed to a polling agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    /// Polling agent.
    pub agent_id: AgentId,
    /// Queued tasks, oldest first.
    pub tasks: Vec<PendingTask>,
}

/// Result reported by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostResultRequest {
    /// Task the result belongs to.
    pub task_id: TaskId,
    /// Whether the task succeeded.
    pub success: bool,
    /// Result payload or error details.
    #[serde(default)]
    pub payload: Payload,
}

/// Producer wait for a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwaitRequest {
    /// Task to wait for.
    pub task_id: TaskId,
    /// Wait budget in milliseconds.
    pub timeout_ms: u64,
}

impl AwaitRequest {
    /// Wait budget.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Claimed result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwaitResponse {
    /// Task the result belongs to.
    pub task_id: TaskId,
    /// Whether the task succeeded.
    pub success: bool,
    /// Result payload.
    pub payload: Payload,
    /// When the result was posted.
    pub completed_at_ms: TimestampMs,
}

impl From<TaskResult> for AwaitResponse {
    fn from(r: TaskResult) -> Self {
        Self {
            task_id: r.task_id,
            success: r.success,
            payload: r.payload,
            completed_at_ms: r.completed_at_ms,
        }
    }
}

/// Broker snapshot plus ledger totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// In-memory routing state.
    #[serde(flatten)]
    pub broker: BrokerStatus,
    /// Ledger totals by status; absent if the ledger could not be read.
    pub ledger: Option<LedgerCounts>,
}

/// Health response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag: the ledger answers.
    pub ok: bool,
    /// Live agents right now.
    pub live_agents: usize,
}

/// Error body returned for a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Stable code: `no_agent_available`, `unknown_agent`, `timeout`,
    /// `pool_exhausted` or `ledger`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Whether retrying later may succeed.
    pub transient: bool,
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        let code = match &err {
            BrokerError::NoAgentAvailable { .. } => "no_agent_available",
            BrokerError::UnknownAgent(_) => "unknown_agent",
            BrokerError::Timeout { .. } => "timeout",
            BrokerError::Ledger(LedgerError::Pool(PoolError::Exhausted { .. })) => "pool_exhausted",
            BrokerError::Ledger(_) => "ledger",
        };
        Self {
            code: code.to_owned(),
            message: err.to_string(),
            transient: err.is_transient(),
        }
    }
}

/// Register or re-register an agent.
pub fn register(broker: &Broker, req: RegisterRequest) -> RegisterResponse {
    let replaced = broker.register(&req.agent_id, &req.display_name, req.capabilities);
    RegisterResponse {
        agent_id: req.agent_id,
        replaced,
    }
}

/// Refresh an agent's liveness.
pub fn heartbeat(broker: &Broker, agent_id: &str) -> HeartbeatResponse {
    HeartbeatResponse {
        known: broker.heartbeat(agent_id),
    }
}

/// Deregister an agent.
pub fn disconnect(broker: &Broker, agent_id: &str) -> HeartbeatResponse {
    HeartbeatResponse {
        known: broker.remove(agent_id),
    }
}

/// Submit a task for routing.
///
/// # Errors
///
/// `no_agent_available` when nothing live matches, or a ledger error.
pub fn submit(broker: &Broker, req: SubmitRequest) -> Result<SubmitResponse, ApiError> {
    let task_id = broker.submit(&req.task_type, req.payload, req.capability.as_deref())?;
    Ok(SubmitResponse { task_id })
}

/// Drain an agent's pending queue.
///
/// # Errors
///
/// `unknown_agent` if the agent must register again.
pub fn poll(broker: &Broker, agent_id: &str) -> Result<PollResponse, ApiError> {
    let tasks = broker.poll_pending(agent_id)?;
    Ok(PollResponse {
        agent_id: agent_id.to_owned(),
        tasks,
    })
}

/// Record an agent's result.
pub fn post_result(broker: &Broker, req: PostResultRequest) {
    broker.post_result(req.task_id, req.success, req.payload);
}

/// Block until a result is available and claim it.
///
/// # Errors
///
/// `timeout` if nothing arrives within the wait budget.
pub fn await_result(broker: &Broker, req: AwaitRequest) -> Result<AwaitResponse, ApiError> {
    Ok(broker.await_result(req.task_id, req.timeout())?.into())
}

/// Routing snapshot and ledger totals.
pub fn status(broker: &Broker, capability: Option<&str>) -> StatusResponse {
    StatusResponse {
        broker: broker.status(capability),
        ledger: broker.ledger().counts().ok(),
    }
}

/// Liveness probe.
pub fn health(broker: &Broker) -> Health {
    Health {
        ok: broker.ledger().counts().is_ok(),
        live_agents: broker.status(None).live_agents,
    }
}
