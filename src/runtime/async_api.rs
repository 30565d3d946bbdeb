//! Async wrappers for callers running on tokio.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::{Broker, BrokerError, TaskResult};
use crate::util::serde::TaskId;

/// [`Broker::await_result`] without blocking the async runtime.
///
/// The condvar wait moves to tokio's blocking pool; the calling task is
/// parked until the result is claimed or `timeout` elapses.
///
/// # Errors
///
/// [`BrokerError::Timeout`] if nothing arrives in time, or if the blocking
/// task was cancelled by runtime shutdown.
pub async fn await_result_async(
    broker: Arc<Broker>,
    task_id: TaskId,
    timeout: Duration,
) -> Result<TaskResult, BrokerError> {
    let started = Instant::now();
    match tokio::task::spawn_blocking(move || broker.await_result(task_id, timeout)).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(BrokerError::Timeout {
            task_id,
            waited: started.elapsed(),
        }),
    }
}
