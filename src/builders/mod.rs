//! Builders to construct a running broker from configuration.

pub mod broker_builder;

pub use broker_builder::{build_broker, BrokerBuilder, BrokerRuntime};
