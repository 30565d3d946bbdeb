//! Runtime surface: transport-neutral API models and the in-process agent.

pub mod api;
#[cfg(feature = "tokio-runtime")]
pub mod agent;
#[cfg(feature = "tokio-runtime")]
pub mod async_api;

pub use api::{ApiError, AwaitResponse, Health, PollResponse, StatusResponse, SubmitRequest, SubmitResponse};
#[cfg(feature = "tokio-runtime")]
pub use agent::{AgentConfig, AgentRunner, TaskHandler};
#[cfg(feature = "tokio-runtime")]
pub use async_api::await_result_async;
