//! Tests for builder modules

use std::sync::Arc;
use std::time::Duration;

use agent_broker::builders::{build_broker, BrokerBuilder};
use agent_broker::config::{BrokerConfig, LedgerBackendConfig};
use agent_broker::core::{OrphanPolicy, TaskStatus};
use agent_broker::infra::InMemoryLedger;
use agent_broker::util::ManualClock;
use serde_json::json;

#[test]
fn test_build_broker_defaults() {
    let runtime = build_broker(BrokerConfig::default()).unwrap();
    let broker = runtime.broker();
    assert_eq!(broker.settings().heartbeat_timeout, Duration::from_secs(60));
    assert_eq!(broker.settings().orphan_policy, OrphanPolicy::Drop);
    assert!(runtime.sweeper_running());
}

#[test]
fn test_builder_injected_ledger_is_used() {
    let ledger = Arc::new(InMemoryLedger::new(16));
    let runtime = BrokerBuilder::new(BrokerConfig::default())
        .with_ledger(ledger.clone())
        .without_sweeper()
        .build()
        .unwrap();

    let broker = runtime.broker();
    broker.register("w1", "worker", ["download"]);
    broker.submit("download", json!({ "id": "1" }), Some("download")).unwrap();
    assert_eq!(ledger.len(), 1);
}

#[test]
fn test_builder_sqlite_ledger_with_manual_clock() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(5_000));
    let config = BrokerConfig {
        ledger: LedgerBackendConfig::Sqlite {
            path: dir.path().join("tasks.db"),
        },
        ..BrokerConfig::default()
    };
    let mut runtime = BrokerBuilder::new(config)
        .with_clock(clock.clone())
        .without_sweeper()
        .build()
        .unwrap();

    let broker = runtime.broker();
    broker.register("w1", "worker", ["download"]);
    let id = broker.submit("download", json!({ "id": "7" }), Some("download")).unwrap();
    broker.poll_pending("w1").unwrap();

    let record = broker.ledger().get(&id).unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Dispatched);
    assert_eq!(record.created_at_ms, 5_000);

    runtime.shutdown();
    runtime.shutdown();
    assert_eq!(runtime.pool_stats().unwrap().idle, 0);
}

#[test]
fn test_builder_rejects_unopenable_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = BrokerConfig {
        ledger: LedgerBackendConfig::Sqlite {
            path: dir.path().join("missing").join("tasks.db"),
        },
        ..BrokerConfig::default()
    };
    assert!(BrokerBuilder::new(config).build().is_err());
}
