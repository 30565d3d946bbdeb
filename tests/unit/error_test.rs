//! Tests for error types

use std::time::Duration;

use agent_broker::core::{BrokerError, ConfigError, LedgerError, PoolError};
use agent_broker::util::TaskId;

#[test]
fn test_no_agent_available_error() {
    let err = BrokerError::NoAgentAvailable { capability: None };
    assert_eq!(format!("{err}"), "no live agent available for capability `*`");
    assert!(!err.is_transient());
}

#[test]
fn test_unknown_agent_error() {
    let err = BrokerError::UnknownAgent("w9".to_string());
    assert_eq!(format!("{err}"), "unknown agent: w9");
    assert!(!err.is_transient());
}

#[test]
fn test_timeout_error_is_transient() {
    let err = BrokerError::Timeout {
        task_id: TaskId::generate(),
        waited: Duration::from_millis(10),
    };
    assert!(err.is_transient());
}

#[test]
fn test_pool_exhausted_surfaces_through_ledger() {
    let err: BrokerError = LedgerError::from(PoolError::Exhausted {
        waited: Duration::from_secs(1),
    })
    .into();
    assert!(err.is_transient());
    assert_eq!(format!("{err}"), "ledger pool: connection pool exhausted after 1s");
}

#[test]
fn test_storage_error_not_transient() {
    let err: BrokerError = LedgerError::Storage("disk full".to_string()).into();
    assert!(!err.is_transient());
    assert_eq!(format!("{err}"), "ledger storage: disk full");
}

#[test]
fn test_config_env_error() {
    let err = ConfigError::Env {
        name: "BROKER_POOL_MAX_SIZE".to_string(),
        reason: "invalid digit found in string".to_string(),
    };
    assert_eq!(
        format!("{err}"),
        "environment variable BROKER_POOL_MAX_SIZE: invalid digit found in string"
    );
}
