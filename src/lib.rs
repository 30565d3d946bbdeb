//! # Agent Broker
//!
//! A capability-routed task broker for intermittently connected worker agents.
//!
//! Agents register with a set of capabilities and heartbeat on an interval.
//! Producers submit tasks naming the capability they need; the broker routes
//! each task to the first live matching agent and queues it there. Agents
//! drain their queue by polling and post results back; producers block on
//! [`crate::core::Broker::await_result`] until the result arrives or a timeout
//! passes. A background sweeper evicts agents that stop heartbeating and drops
//! results nobody claimed.
//!
//! Every task is also written to a [`crate::core::TaskLedger`]. The durable backend
//! runs on SQLite through a bounded, validity-checked connection pool
//! ([`crate::core::ResourcePool`]).
//!
//! ## Key Features
//!
//! - **Capability routing**: first live match in registration order
//! - **Drain-on-poll delivery**: a delivered task is never delivered again
//! - **Single-claim results**: the first successful waiter takes the result
//! - **Passive liveness**: missed heartbeats, not probes, retire agents
//! - **Explicit orphan policy**: drop or fail tasks queued for departed agents
//! - **Bounded connection pool**: blocking checkout with timeout, RAII release
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use agent_broker::builders::BrokerBuilder;
//! use agent_broker::config::BrokerConfig;
//! use serde_json::json;
//!
//! let runtime = BrokerBuilder::new(BrokerConfig::from_env()?).build()?;
//! let broker = runtime.broker();
//!
//! // Agent side
//! broker.register("w1", "worker one", ["download"]);
//!
//! // Producer side
//! let task_id = broker.submit("download", json!({ "id": "42" }), Some("download"))?;
//!
//! // Agent side
//! for task in broker.poll_pending("w1")? {
//!     broker.post_result(task.task_id, true, json!({ "path": "/tmp/42.pdf" }));
//! }
//!
//! // Producer side
//! let result = broker.await_result(task_id, Duration::from_secs(5))?;
//! assert!(result.success);
//! ```
//!
//! For complete scenarios, see `tests/broker_scenarios.rs`.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core broker state, error types, ledger contract and connection pool.
pub mod core;
/// Configuration models for the broker, ledger and pool.
pub mod config;
/// Builders to construct a running broker from configuration.
pub mod builders;
/// Storage adapters for the task ledger and connection pool.
pub mod infra;
/// API models and in-process agent runtime.
pub mod runtime;
/// Shared utilities.
pub mod util;
