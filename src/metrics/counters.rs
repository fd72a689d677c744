//! Atomic counters for hot-path metrics
//!
//! Lock-free counters that can be safely updated from any thread.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance
pub static METRICS: Metrics = Metrics::new();

/// Atomic metrics counters
pub struct Metrics {
    // Client metrics
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,

    // Pool metrics
    pub buffers_claimed: AtomicU64,
    pub buffers_released: AtomicU64,
    pub claim_misses: AtomicU64,

    // Queue metrics
    pub messages_enqueued: AtomicU64,
    pub messages_dropped: AtomicU64,

    // Writer metrics
    pub messages_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub write_failures: AtomicU64,
    pub malformed_buffers: AtomicU64,
    pub disconnects: AtomicU64,
    pub writers_started: AtomicU64,
    pub writers_stopped: AtomicU64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            buffers_claimed: AtomicU64::new(0),
            buffers_released: AtomicU64::new(0),
            claim_misses: AtomicU64::new(0),
            messages_enqueued: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            malformed_buffers: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            writers_started: AtomicU64::new(0),
            writers_stopped: AtomicU64::new(0),
        }
    }

    // Client tracking
    #[inline]
    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    // Pool tracking
    #[inline]
    pub fn buffer_claimed(&self) {
        self.buffers_claimed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn buffer_released(&self) {
        self.buffers_released.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn claim_miss(&self) {
        self.claim_misses.fetch_add(1, Ordering::Relaxed);
    }

    // Queue tracking
    #[inline]
    pub fn message_enqueued(&self) {
        self.messages_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped(&self, count: u64) {
        self.messages_dropped.fetch_add(count, Ordering::Relaxed);
    }

    // Writer tracking
    #[inline]
    pub fn message_sent(&self, bytes: u64) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn write_failed(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn malformed_buffer(&self) {
        self.malformed_buffers.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn writer_started(&self) {
        self.writers_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn writer_stopped(&self) {
        self.writers_stopped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            buffers_claimed: self.buffers_claimed.load(Ordering::Relaxed),
            buffers_released: self.buffers_released.load(Ordering::Relaxed),
            claim_misses: self.claim_misses.load(Ordering::Relaxed),
            messages_enqueued: self.messages_enqueued.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            malformed_buffers: self.malformed_buffers.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            writers_started: self.writers_started.load(Ordering::Relaxed),
            writers_stopped: self.writers_stopped.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics for reporting
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub buffers_claimed: u64,
    pub buffers_released: u64,
    pub claim_misses: u64,
    pub messages_enqueued: u64,
    pub messages_dropped: u64,
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub write_failures: u64,
    pub malformed_buffers: u64,
    pub disconnects: u64,
    pub writers_started: u64,
    pub writers_stopped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_counters() {
        let metrics = Metrics::new();
        metrics.buffer_claimed();
        metrics.message_sent(12);
        metrics.message_sent(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.buffers_claimed, 1);
        assert_eq!(snapshot.messages_sent, 2);
        assert_eq!(snapshot.bytes_sent, 15);
        assert_eq!(snapshot.write_failures, 0);
    }
}
