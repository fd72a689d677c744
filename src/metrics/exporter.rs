//! Prometheus metrics exporter
//!
//! HTTP endpoint for Prometheus scraping.

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;

use super::counters::{MetricsSnapshot, METRICS};
use crate::config::MetricsConfig;

/// Initialize the Prometheus metrics exporter.
///
/// Must be called from inside a tokio runtime.
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    // Register metric descriptions
    describe_counter!("sendpath_connections_total", "Total clients registered");
    describe_gauge!("sendpath_connections_active", "Currently registered clients");
    describe_counter!("sendpath_buffers_claimed", "Pool blocks claimed");
    describe_counter!("sendpath_buffers_released", "Pool blocks released");
    describe_counter!("sendpath_claim_misses", "Claims that found no free block");
    describe_counter!("sendpath_messages_enqueued", "Buffers handed to a send queue");
    describe_counter!("sendpath_messages_dropped", "Buffers dropped before transmission");
    describe_counter!("sendpath_messages_sent", "Buffers written to a transport");
    describe_counter!("sendpath_bytes_sent", "Bytes written to transports");
    describe_counter!("sendpath_write_failures", "Transport write failures");
    describe_counter!("sendpath_malformed_buffers", "Buffers rejected for a bad header");
    describe_counter!("sendpath_disconnects", "Disconnect packets written");
    describe_gauge!("sendpath_writers_active", "Running writer threads");

    // Build and install the Prometheus exporter
    PrometheusBuilder::new()
        .with_http_listener(config.bind_addr)
        .install()?;

    // Start background task to sync atomic counters to metrics crate
    tokio::spawn(sync_metrics_task());

    Ok(())
}

/// Background task that periodically syncs our atomic counters to the metrics crate
async fn sync_metrics_task() {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut last = MetricsSnapshot::default();

    loop {
        interval.tick().await;

        let now = METRICS.snapshot();

        sync_counter("sendpath_connections_total", now.connections_total, last.connections_total);
        sync_counter("sendpath_buffers_claimed", now.buffers_claimed, last.buffers_claimed);
        sync_counter("sendpath_buffers_released", now.buffers_released, last.buffers_released);
        sync_counter("sendpath_claim_misses", now.claim_misses, last.claim_misses);
        sync_counter("sendpath_messages_enqueued", now.messages_enqueued, last.messages_enqueued);
        sync_counter("sendpath_messages_dropped", now.messages_dropped, last.messages_dropped);
        sync_counter("sendpath_messages_sent", now.messages_sent, last.messages_sent);
        sync_counter("sendpath_bytes_sent", now.bytes_sent, last.bytes_sent);
        sync_counter("sendpath_write_failures", now.write_failures, last.write_failures);
        sync_counter("sendpath_malformed_buffers", now.malformed_buffers, last.malformed_buffers);
        sync_counter("sendpath_disconnects", now.disconnects, last.disconnects);

        gauge!("sendpath_connections_active").set(now.connections_active as f64);
        gauge!("sendpath_writers_active")
            .set(now.writers_started.saturating_sub(now.writers_stopped) as f64);

        last = now;
    }
}

/// Push the delta between two readings of a monotonic counter
fn sync_counter(name: &'static str, now: u64, last: u64) {
    let delta = now.saturating_sub(last);
    if delta > 0 {
        counter!(name).increment(delta);
    }
}
