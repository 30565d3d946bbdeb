//! Tests for task ledger backends behind the shared trait

use std::sync::Arc;
use std::time::Duration;

use agent_broker::core::{PoolLimits, ResourcePool, TaskLedger, TaskRecord, TaskStatus};
use agent_broker::infra::{InMemoryLedger, SqliteConnectionManager, SqliteLedger};
use agent_broker::util::TaskId;
use serde_json::json;

fn sqlite(dir: &tempfile::TempDir) -> SqliteLedger {
    let pool = ResourcePool::new(
        SqliteConnectionManager::file(dir.path().join("ledger.db")),
        PoolLimits {
            max_size: 2,
            idle_timeout: Duration::from_secs(30),
        },
    );
    SqliteLedger::new(pool, Duration::from_secs(1)).unwrap()
}

fn exercise(ledger: &dyn TaskLedger) {
    let a = TaskRecord::pending(TaskId::generate(), "w1", "download", json!({ "id": "1" }), 10);
    let b = TaskRecord::pending(TaskId::generate(), "w1", "download", json!({ "id": "2" }), 20);
    ledger.record(&a).unwrap();
    ledger.record(&b).unwrap();

    assert_eq!(ledger.mark_dispatched(&[a.id, b.id], 30).unwrap(), 2);
    assert!(ledger.mark_finished(&a.id, true, &json!({ "path": "/tmp/1.pdf" }), 40).unwrap());
    assert!(ledger.mark_finished(&b.id, false, &json!({ "error": "404" }), 50).unwrap());

    let a = ledger.get(&a.id).unwrap().unwrap();
    assert_eq!(a.status, TaskStatus::Completed);
    assert!(a.status.is_terminal());
    assert_eq!(a.result, Some(json!({ "path": "/tmp/1.pdf" })));

    let failed = ledger.list(Some(TaskStatus::Failed), 10).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, b.id);

    let counts = ledger.counts().unwrap();
    assert_eq!((counts.completed, counts.failed, counts.total()), (1, 1, 2));
}

#[test]
fn test_in_memory_ledger_contract() {
    exercise(&InMemoryLedger::new(100));
}

#[test]
fn test_sqlite_ledger_contract() {
    let dir = tempfile::tempdir().unwrap();
    exercise(&sqlite(&dir));
}

#[test]
fn test_sqlite_ledger_concurrent_writers() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(sqlite(&dir));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let ledger = Arc::clone(&ledger);
            std::thread::spawn(move || {
                for n in 0..10 {
                    let rec = TaskRecord::pending(TaskId::generate(), "w1", "download", json!([t, n]), n);
                    ledger.record(&rec).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(ledger.counts().unwrap().pending, 40);
    let stats = ledger.pool().stats();
    assert!(stats.open <= 2);
    assert_eq!(stats.in_use, 0);
}

#[test]
fn test_task_status_strings() {
    for status in [
        TaskStatus::Pending,
        TaskStatus::Dispatched,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ] {
        assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
    }
    assert!("lost".parse::<TaskStatus>().is_err());
}
