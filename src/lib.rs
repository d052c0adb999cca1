//! EmberMQ - MQTT v5.0 broker
//!
//! A tokio-based broker implementing QoS 0/1 delivery, wildcard and shared
//! subscriptions, session takeover and offline QoS 1 retention. QoS 2,
//! retained messages, Will messages and MQTT 3.x are out of scope.

pub mod broker;
pub mod codec;
pub mod config;
pub mod metrics;
pub mod protocol;
pub mod session;
pub mod topic;

pub use broker::{Broker, BrokerConfig};
pub use config::Config;
pub use metrics::{Metrics, MetricsServer};
pub use protocol::QoS;
