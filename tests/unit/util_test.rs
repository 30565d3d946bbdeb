//! Tests for utility functions

use std::time::Duration;

use agent_broker::util::{duration_ms, Clock, ManualClock, SystemClock, TaskId};

#[test]
fn test_task_id_display_parse() {
    let id = TaskId::generate();
    let parsed: TaskId = id.to_string().parse().unwrap();
    assert_eq!(parsed, id);
    assert!("not-a-uuid".parse::<TaskId>().is_err());
}

#[test]
fn test_task_id_serializes_as_string() {
    let id = TaskId::generate();
    let json = serde_json::to_value(id).unwrap();
    assert_eq!(json, serde_json::Value::String(id.to_string()));
}

#[test]
fn test_manual_clock() {
    let clock = ManualClock::new(1_000);
    clock.advance(Duration::from_secs(2));
    assert_eq!(clock.now_ms(), 3_000);
    clock.set(10);
    assert_eq!(clock.now_ms(), 10);
}

#[test]
fn test_system_clock_is_recent() {
    assert!(SystemClock.now_ms() > 1_600_000_000_000);
    assert_eq!(duration_ms(Duration::from_millis(1_500)), 1_500);
}
