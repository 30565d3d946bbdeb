//! End-to-end broker scenarios
//!
//! These tests drive the broker the way producers and agents do:
//! - Routing by capability and liveness
//! - Drain-on-poll delivery
//! - Single-claim results and timeouts
//! - Sweeper eviction and orphan handling
//! - Concurrent producers and agents

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use agent_broker::core::{
    Broker, BrokerError, BrokerSettings, LivenessSweeper, OrphanPolicy, TaskLedger, TaskStatus,
};
use agent_broker::infra::InMemoryLedger;
use agent_broker::util::{init_tracing, ManualClock};
use serde_json::json;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

const START_MS: u64 = 1_700_000_000_000;

fn broker(policy: OrphanPolicy) -> (Arc<Broker>, Arc<ManualClock>, Arc<InMemoryLedger>) {
    init_tracing();
    let clock = Arc::new(ManualClock::new(START_MS));
    let ledger = Arc::new(InMemoryLedger::new(1_000));
    let settings = BrokerSettings {
        orphan_policy: policy,
        ..BrokerSettings::default()
    };
    let broker = Broker::new(settings, ledger.clone(), clock.clone());
    (Arc::new(broker), clock, ledger)
}

// ============================================================================
// END-TO-END
// ============================================================================

#[test]
fn test_download_round_trip() {
    let (broker, _clock, ledger) = broker(OrphanPolicy::Drop);
    broker.register("w1", "worker one", ["download"]);

    let t1 = broker
        .submit("download", json!({ "id": "42" }), Some("download"))
        .unwrap();
    assert_eq!(ledger.get(&t1).unwrap().unwrap().target_agent_id, "w1");

    let delivered = broker.poll_pending("w1").unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].task_id, t1);
    assert_eq!(delivered[0].task_type, "download");
    assert_eq!(delivered[0].payload, json!({ "id": "42" }));

    broker.post_result(t1, true, json!({ "path": "/tmp/42.pdf" }));
    let result = broker.await_result(t1, Duration::from_secs(5)).unwrap();
    assert!(result.success);
    assert_eq!(result.payload, json!({ "path": "/tmp/42.pdf" }));

    let record = ledger.get(&t1).unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(record.result, Some(json!({ "path": "/tmp/42.pdf" })));
}

#[test]
fn test_result_claimed_once() {
    let (broker, _clock, _ledger) = broker(OrphanPolicy::Drop);
    broker.register("w1", "w1", ["download"]);
    let id = broker.submit("download", json!({}), Some("download")).unwrap();
    broker.post_result(id, true, json!("done"));

    assert_eq!(broker.await_result(id, Duration::from_secs(1)).unwrap().payload, json!("done"));
    let err = broker.await_result(id, Duration::from_millis(20)).unwrap_err();
    assert!(matches!(err, BrokerError::Timeout { task_id, .. } if task_id == id));
}

#[test]
fn test_late_result_survives_timeout() {
    let (broker, _clock, ledger) = broker(OrphanPolicy::Drop);
    broker.register("w1", "w1", ["download"]);
    let id = broker.submit("download", json!({}), Some("download")).unwrap();

    let err = broker.await_result(id, Duration::from_millis(20)).unwrap_err();
    assert!(matches!(err, BrokerError::Timeout { task_id, .. } if task_id == id));
    assert_eq!(broker.status(None).unclaimed_results, 0);

    broker.post_result(id, true, json!("late"));
    assert_eq!(broker.status(None).unclaimed_results, 1);
    assert_eq!(ledger.get(&id).unwrap().unwrap().status, TaskStatus::Completed);

    let claimed = broker.await_result(id, Duration::from_millis(20)).unwrap();
    assert_eq!(claimed.payload, json!("late"));
    assert_eq!(broker.status(None).unclaimed_results, 0);

    let err = broker.await_result(id, Duration::from_millis(20)).unwrap_err();
    assert!(matches!(err, BrokerError::Timeout { .. }));
}

// ============================================================================
// ROUTING
// ============================================================================

#[test]
fn test_no_live_agent_creates_no_queue() {
    let (broker, clock, ledger) = broker(OrphanPolicy::Drop);

    let err = broker.submit("download", json!({}), Some("download")).unwrap_err();
    assert!(matches!(err, BrokerError::NoAgentAvailable { .. }));

    broker.register("w1", "w1", ["analyze"]);
    assert!(broker.submit("download", json!({}), Some("download")).is_err());

    broker.register("w2", "w2", ["download"]);
    clock.advance(Duration::from_secs(61));
    assert!(broker.submit("download", json!({}), Some("download")).is_err());

    assert!(!broker.has_pending_queue("w1"));
    assert!(!broker.has_pending_queue("w2"));
    assert!(ledger.is_empty());
}

#[test]
fn test_reregistration_latest_capabilities_win() {
    let (broker, _clock, _ledger) = broker(OrphanPolicy::Drop);
    broker.register("w1", "w1", ["download"]);
    assert!(broker.register("w1", "w1 renamed", ["analyze", "translate"]));

    assert!(broker.find_live(Some("download")).is_none());
    assert_eq!(broker.find_live(Some("translate")).unwrap().display_name, "w1 renamed");
    assert_eq!(broker.status(None).registered_agents, 1);
}

#[test]
fn test_first_registered_agent_is_preferred() {
    let (broker, clock, _ledger) = broker(OrphanPolicy::Drop);
    broker.register("a", "a", ["x"]);
    clock.advance(Duration::from_secs(1));
    broker.register("b", "b", ["x"]);

    for _ in 0..3 {
        broker.submit("x", json!({}), Some("x")).unwrap();
    }
    assert_eq!(broker.pending_depth("a"), 3);
    assert_eq!(broker.pending_depth("b"), 0);

    // Once `a` goes quiet, `b` takes new work.
    clock.advance(Duration::from_secs(60));
    broker.heartbeat("b");
    broker.submit("x", json!({}), Some("x")).unwrap();
    assert_eq!(broker.pending_depth("b"), 1);
}

#[test]
fn test_poll_drains_queue() {
    let (broker, _clock, ledger) = broker(OrphanPolicy::Drop);
    broker.register("w1", "w1", ["x"]);
    let ids: Vec<_> = (0..3)
        .map(|n| broker.submit("x", json!({ "n": n }), Some("x")).unwrap())
        .collect();

    let first: Vec<_> = broker.poll_pending("w1").unwrap().into_iter().map(|t| t.task_id).collect();
    assert_eq!(first, ids);
    assert!(broker.poll_pending("w1").unwrap().is_empty());
    assert_eq!(ledger.counts().unwrap().dispatched, 3);

    assert!(matches!(
        broker.poll_pending("ghost"),
        Err(BrokerError::UnknownAgent(id)) if id == "ghost"
    ));
}

// ============================================================================
// LIVENESS
// ============================================================================

#[test]
fn test_sweep_evicts_silent_agent_and_queue() {
    let (broker, clock, ledger) = broker(OrphanPolicy::Drop);
    broker.register("a", "a", ["x"]);
    broker.register("b", "b", ["x"]);
    let id = broker.submit("x", json!({}), Some("x")).unwrap();
    assert_eq!(broker.pending_depth("a"), 1);

    clock.advance(Duration::from_secs(100));
    broker.heartbeat("b");
    clock.advance(Duration::from_secs(21));

    let report = broker.sweep();
    assert_eq!(report.evicted_agents, vec!["a".to_string()]);
    assert_eq!(report.orphaned_tasks, 0);
    assert_eq!(broker.find_live(Some("x")).unwrap().id, "b");
    assert!(!broker.has_pending_queue("a"));
    assert!(broker.agent("a").is_none());
    assert_eq!(ledger.get(&id).unwrap().unwrap().status, TaskStatus::Pending);
}

#[test]
fn test_fail_policy_wakes_waiting_producer() {
    let (broker, clock, ledger) = broker(OrphanPolicy::Fail);
    broker.register("w1", "w1", ["x"]);
    let id = broker.submit("x", json!({}), Some("x")).unwrap();

    let waiter = {
        let broker = Arc::clone(&broker);
        thread::spawn(move || broker.await_result(id, Duration::from_secs(5)))
    };
    thread::sleep(Duration::from_millis(20));
    clock.advance(Duration::from_secs(121));
    let report = broker.sweep();
    assert_eq!(report.orphaned_tasks, 1);

    let result = waiter.join().unwrap().unwrap();
    assert!(!result.success);
    assert_eq!(result.payload["error"], "agent_departed");
    assert_eq!(result.payload["agent_id"], "w1");
    assert_eq!(ledger.get(&id).unwrap().unwrap().status, TaskStatus::Failed);
}

#[test]
fn test_stale_results_are_reaped() {
    let (broker, clock, _ledger) = broker(OrphanPolicy::Drop);
    broker.register("w1", "w1", ["x"]);
    let id = broker.submit("x", json!({}), Some("x")).unwrap();
    broker.post_result(id, true, json!({}));
    assert_eq!(broker.status(None).unclaimed_results, 1);

    clock.advance(Duration::from_secs(601));
    broker.heartbeat("w1");
    assert_eq!(broker.sweep().reaped_results, 1);
    assert!(broker.await_result(id, Duration::from_millis(10)).is_err());
}

#[test]
fn test_background_sweeper_runs() {
    let clock = Arc::new(ManualClock::new(START_MS));
    let broker = Arc::new(Broker::new(
        BrokerSettings::default(),
        Arc::new(InMemoryLedger::new(10)),
        clock.clone(),
    ));
    broker.register("w1", "w1", ["x"]);
    clock.advance(Duration::from_secs(300));

    let mut sweeper = LivenessSweeper::spawn(Arc::clone(&broker), Duration::from_millis(5)).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while broker.agent("w1").is_some() {
        assert!(Instant::now() < deadline, "sweeper never evicted the agent");
        thread::sleep(Duration::from_millis(5));
    }
    sweeper.stop();
    assert!(!sweeper.is_running());
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_concurrent_producers_and_agents() {
    let broker = Arc::new(Broker::in_memory());
    let done = Arc::new(AtomicBool::new(false));
    for w in 0..4 {
        broker.register(&format!("w{w}"), "worker", ["x"]);
    }

    let agents: Vec<_> = (0..4)
        .map(|w| {
            let broker = Arc::clone(&broker);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let id = format!("w{w}");
                while !done.load(Ordering::Acquire) {
                    for task in broker.poll_pending(&id).unwrap() {
                        broker.post_result(task.task_id, true, task.payload);
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            })
        })
        .collect();

    let producers: Vec<_> = (0..8)
        .map(|p| {
            let broker = Arc::clone(&broker);
            thread::spawn(move || {
                for n in 0..25 {
                    let payload = json!({ "producer": p, "n": n });
                    let id = broker.submit("x", payload.clone(), Some("x")).unwrap();
                    let result = broker.await_result(id, Duration::from_secs(10)).unwrap();
                    assert_eq!(result.payload, payload);
                }
            })
        })
        .collect();

    for p in producers {
        p.join().unwrap();
    }
    done.store(true, Ordering::Release);
    let status = broker.status(Some("x"));
    assert_eq!(status.pending_tasks, 0);
    assert_eq!(status.unclaimed_results, 0);
    assert_eq!(broker.ledger().counts().unwrap().completed, 200);

    for a in agents {
        a.join().unwrap();
    }
}
