//! Tests for the API surface and in-process agents

use std::sync::Arc;
use std::time::Duration;

use agent_broker::core::{Broker, PendingTask};
use agent_broker::runtime::api::{self, AwaitRequest, PostResultRequest, RegisterRequest, SubmitRequest};
use agent_broker::runtime::{await_result_async, AgentConfig, AgentRunner, TaskHandler};
use agent_broker::util::Payload;
use async_trait::async_trait;
use serde_json::json;

struct Echo;

#[async_trait]
impl TaskHandler for Echo {
    async fn handle(&self, task: PendingTask) -> Result<Payload, Payload> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        Ok(json!({ "type": task.task_type, "echo": task.payload }))
    }
}

#[test]
fn test_submit_without_agent_is_rejected() {
    let broker = Broker::in_memory();
    let err = api::submit(
        &broker,
        SubmitRequest {
            task_type: "download".to_string(),
            payload: json!({}),
            capability: Some("download".to_string()),
        },
    )
    .unwrap_err();
    assert_eq!(err.code, "no_agent_available");
    assert_eq!(broker.status(None).pending_tasks, 0);
}

#[test]
fn test_await_timeout_maps_to_code() {
    let broker = Broker::in_memory();
    api::register(
        &broker,
        RegisterRequest {
            agent_id: "w1".to_string(),
            display_name: String::new(),
            capabilities: vec!["x".to_string()],
        },
    );
    let id = broker.submit("x", json!(1), Some("x")).unwrap();
    let err = api::await_result(
        &broker,
        AwaitRequest {
            task_id: id,
            timeout_ms: 10,
        },
    )
    .unwrap_err();
    assert_eq!(err.code, "timeout");
    assert!(err.transient);

    api::post_result(
        &broker,
        PostResultRequest {
            task_id: id,
            success: false,
            payload: json!({ "error": "late" }),
        },
    );
    let late = api::await_result(
        &broker,
        AwaitRequest {
            task_id: id,
            timeout_ms: 10,
        },
    )
    .unwrap();
    assert!(!late.success);
}

#[test]
fn test_status_response_flattens_counts() {
    let broker = Broker::in_memory();
    broker.register("w1", "w1", ["x"]);
    let json = serde_json::to_value(api::status(&broker, Some("x"))).unwrap();
    assert_eq!(json["live_agents"], 1);
    assert_eq!(json["matching_agents"], 1);
    assert_eq!(json["ledger"]["pending"], 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_agent_runner_with_async_producer() {
    let broker = Arc::new(Broker::in_memory());
    let runner = AgentRunner::spawn(
        Arc::clone(&broker),
        AgentConfig::new("echo-1", ["echo"]).with_poll_interval(Duration::from_millis(5)),
        Echo,
    )
    .unwrap();

    let id = broker.submit("echo", json!({ "n": 3 }), Some("echo")).unwrap();
    let result = await_result_async(Arc::clone(&broker), id, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.payload["echo"]["n"], 3);
    assert_eq!(result.payload["type"], "echo");
    assert_eq!(runner.agent_id(), "echo-1");

    tokio::task::spawn_blocking(move || drop(runner)).await.unwrap();
    assert!(broker.agent("echo-1").is_none());
}
