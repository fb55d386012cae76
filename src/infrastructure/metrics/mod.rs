//! Prometheus Metrics Module
//!
//! Application-wide metrics collection for the chat relay.
//!
//! # Metrics Collected
//! - Active WebSocket connection gauge
//! - Relayed message counter
//! - Connection rejection counter by reason

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Active WebSocket connections gauge
pub static CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new(
            "connections_active",
            "Number of active WebSocket connections",
        )
        .namespace("chat_relay"),
    )
    .expect("Failed to create CONNECTIONS_ACTIVE metric")
});

/// Total messages persisted and broadcast
pub static MESSAGES_RELAYED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "messages_relayed_total",
            "Total number of messages persisted and broadcast",
        )
        .namespace("chat_relay"),
    )
    .expect("Failed to create MESSAGES_RELAYED_TOTAL metric")
});

/// Connection rejection counter by reason
pub static CONNECTION_REJECTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "connection_rejections_total",
            "Connections rejected during the handshake",
        )
        .namespace("chat_relay"),
        &["reason"], // "unauthenticated", "store", "timeout"
    )
    .expect("Failed to create CONNECTION_REJECTIONS_TOTAL metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(CONNECTIONS_ACTIVE.clone()))
        .expect("Failed to register CONNECTIONS_ACTIVE");
    registry
        .register(Box::new(MESSAGES_RELAYED_TOTAL.clone()))
        .expect("Failed to register MESSAGES_RELAYED_TOTAL");
    registry
        .register(Box::new(CONNECTION_REJECTIONS_TOTAL.clone()))
        .expect("Failed to register CONNECTION_REJECTIONS_TOTAL");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Metrics should be valid UTF-8")
}

/// Helper to count a rejected handshake
pub fn record_rejection(reason: &str) {
    CONNECTION_REJECTIONS_TOTAL
        .with_label_values(&[reason])
        .inc();
}
