//! Tests for configuration validation

use std::path::PathBuf;

use agent_broker::config::{BrokerConfig, ConnectionPoolConfig, LedgerBackendConfig};
use agent_broker::core::{ConfigError, OrphanPolicy};

#[test]
fn test_default_config_validation() {
    assert!(BrokerConfig::default().validate().is_ok());
    assert!(ConnectionPoolConfig::default().validate().is_ok());
}

#[test]
fn test_pool_config_invalid_max_size() {
    let invalid = ConnectionPoolConfig {
        max_size: 0,
        ..ConnectionPoolConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_pool_config_invalid_acquire_timeout() {
    let invalid = ConnectionPoolConfig {
        acquire_timeout_secs: 0,
        ..ConnectionPoolConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_broker_config_invalid_heartbeat() {
    let invalid = BrokerConfig {
        heartbeat_timeout_secs: 0,
        ..BrokerConfig::default()
    };
    assert!(matches!(invalid.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_broker_config_nested_pool_error() {
    let invalid = BrokerConfig {
        pool: ConnectionPoolConfig {
            reap_interval_secs: 0,
            ..ConnectionPoolConfig::default()
        },
        ..BrokerConfig::default()
    };
    let err = invalid.validate().unwrap_err();
    assert!(err.to_string().contains("reap_interval_secs"));
}

#[test]
fn test_empty_ledger_limits_rejected() {
    let invalid = BrokerConfig {
        ledger: LedgerBackendConfig::InMemory { max_records: 0 },
        ..BrokerConfig::default()
    };
    assert!(invalid.validate().is_err());

    let invalid = BrokerConfig {
        ledger: LedgerBackendConfig::Sqlite {
            path: PathBuf::new(),
        },
        ..BrokerConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "heartbeat_timeout_secs": 30,
        "dead_threshold_secs": 90,
        "orphan_policy": "fail",
        "ledger": { "kind": "sqlite", "path": "/var/lib/broker/tasks.db" },
        "pool": { "max_size": 4 }
    }"#;

    let cfg = BrokerConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.heartbeat_timeout_secs, 30);
    assert_eq!(cfg.sweep_interval_secs, 30);
    assert_eq!(cfg.orphan_policy, OrphanPolicy::Fail);
    assert_eq!(cfg.pool.max_size, 4);
    assert_eq!(cfg.pool.acquire_timeout_secs, 5);
    assert_eq!(
        cfg.ledger,
        LedgerBackendConfig::Sqlite {
            path: PathBuf::from("/var/lib/broker/tasks.db")
        }
    );
}

#[test]
fn test_config_from_json_invalid() {
    assert!(matches!(
        BrokerConfig::from_json_str("{ not json"),
        Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
        BrokerConfig::from_json_str(r#"{ "dead_threshold_secs": 10 }"#),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_config_json_roundtrip_preserves_settings() {
    let cfg = BrokerConfig {
        result_retention_secs: 42,
        ..BrokerConfig::default()
    };
    let json = serde_json::to_string(&cfg).unwrap();
    let back = BrokerConfig::from_json_str(&json).unwrap();
    assert_eq!(back, cfg);
    assert_eq!(back.settings().result_retention.as_secs(), 42);
}
