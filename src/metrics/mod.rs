//! Prometheus metrics
//!
//! One registry for the whole broker. Delivery failures that are not
//! reported to the publisher (queue overflow, oversize drops) are counted
//! here instead.

use prometheus::{IntCounter, IntGauge, Opts, Registry};

mod server;

pub use server::MetricsServer;

/// All broker metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    /// Connections accepted since startup
    pub connections_total: IntCounter,
    /// Currently connected clients
    pub connections_current: IntGauge,
    /// Connections displaced by a newer CONNECT with the same client id
    pub takeovers_total: IntCounter,
    /// Connections closed for keep-alive silence
    pub keepalive_timeouts_total: IntCounter,
    /// Connections shed because the write buffer cap was crossed
    pub connections_shed_total: IntCounter,

    /// Sessions destroyed by expiry
    pub sessions_expired_total: IntCounter,
    /// Sessions currently in the store (connected or within expiry window)
    pub sessions_current: IntGauge,

    /// Packets decoded from clients
    pub packets_received_total: IntCounter,
    /// Packets written to clients
    pub packets_sent_total: IntCounter,
    /// Bytes read from client sockets
    pub bytes_received_total: IntCounter,
    /// Bytes written to client sockets
    pub bytes_sent_total: IntCounter,
    /// Malformed or protocol-violating packets
    pub protocol_errors_total: IntCounter,

    /// PUBLISH packets routed to at least one subscriber
    pub publish_received_total: IntCounter,
    /// PUBLISH deliveries written or queued
    pub publish_delivered_total: IntCounter,
    /// Deliveries dropped: queue overflow, oversize packet, offline QoS 0
    pub publish_dropped_total: IntCounter,
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help)).expect("valid metric options")
}

fn gauge(name: &str, help: &str) -> IntGauge {
    IntGauge::with_opts(Opts::new(name, help)).expect("valid metric options")
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let metrics = Self {
            connections_total: counter(
                "embermq_connections_total",
                "Client connections accepted since startup",
            ),
            connections_current: gauge(
                "embermq_connections_current",
                "Currently connected clients",
            ),
            takeovers_total: counter(
                "embermq_takeovers_total",
                "Connections displaced by session takeover",
            ),
            keepalive_timeouts_total: counter(
                "embermq_keepalive_timeouts_total",
                "Connections closed after keep-alive silence",
            ),
            connections_shed_total: counter(
                "embermq_connections_shed_total",
                "Connections closed because the write buffer cap was exceeded",
            ),
            sessions_expired_total: counter(
                "embermq_sessions_expired_total",
                "Sessions destroyed by expiry",
            ),
            sessions_current: gauge("embermq_sessions_current", "Sessions currently stored"),
            packets_received_total: counter(
                "embermq_packets_received_total",
                "Control packets decoded from clients",
            ),
            packets_sent_total: counter(
                "embermq_packets_sent_total",
                "Control packets written to clients",
            ),
            bytes_received_total: counter(
                "embermq_bytes_received_total",
                "Bytes read from client sockets",
            ),
            bytes_sent_total: counter(
                "embermq_bytes_sent_total",
                "Bytes written to client sockets",
            ),
            protocol_errors_total: counter(
                "embermq_protocol_errors_total",
                "Malformed or protocol-violating packets",
            ),
            publish_received_total: counter(
                "embermq_publish_received_total",
                "PUBLISH packets accepted from clients",
            ),
            publish_delivered_total: counter(
                "embermq_publish_delivered_total",
                "PUBLISH deliveries written or queued to subscribers",
            ),
            publish_dropped_total: counter(
                "embermq_publish_dropped_total",
                "PUBLISH deliveries dropped (overflow, oversize, offline QoS 0)",
            ),
            registry,
        };

        let collectors: [Box<dyn prometheus::core::Collector>; 15] = [
            Box::new(metrics.connections_total.clone()),
            Box::new(metrics.connections_current.clone()),
            Box::new(metrics.takeovers_total.clone()),
            Box::new(metrics.keepalive_timeouts_total.clone()),
            Box::new(metrics.connections_shed_total.clone()),
            Box::new(metrics.sessions_expired_total.clone()),
            Box::new(metrics.sessions_current.clone()),
            Box::new(metrics.packets_received_total.clone()),
            Box::new(metrics.packets_sent_total.clone()),
            Box::new(metrics.bytes_received_total.clone()),
            Box::new(metrics.bytes_sent_total.clone()),
            Box::new(metrics.protocol_errors_total.clone()),
            Box::new(metrics.publish_received_total.clone()),
            Box::new(metrics.publish_delivered_total.clone()),
            Box::new(metrics.publish_dropped_total.clone()),
        ];
        for collector in collectors {
            metrics
                .registry
                .register(collector)
                .expect("metric registers once");
        }

        metrics
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
