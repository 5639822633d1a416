/// Push channel metrics
///
/// Lifetime counters for diagnostics. Nothing in the synchronization logic
/// reads them back.
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ChannelMetrics {
    /// Successful link opens (first connect and reconnects)
    connections_opened: AtomicU64,

    /// Unexpected drops, failed opens included
    connections_lost: AtomicU64,

    /// Heartbeat windows that closed without a pong
    heartbeat_timeouts: AtomicU64,

    /// Frames written to the link
    frames_sent: AtomicU64,

    /// `send` calls refused because the channel was not connected
    sends_rejected: AtomicU64,

    /// Frames read from the link
    frames_received: AtomicU64,

    /// Inbound frames that could not be parsed
    frames_malformed: AtomicU64,
}

impl ChannelMetrics {
    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_timeout(&self) {
        self.heartbeat_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_rejected(&self) {
        self.sends_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_malformed(&self) {
        self.frames_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ChannelMetricsSnapshot {
        ChannelMetricsSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_lost: self.connections_lost.load(Ordering::Relaxed),
            heartbeat_timeouts: self.heartbeat_timeouts.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            sends_rejected: self.sends_rejected.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot (serializable)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelMetricsSnapshot {
    pub connections_opened: u64,
    pub connections_lost: u64,
    pub heartbeat_timeouts: u64,
    pub frames_sent: u64,
    pub sends_rejected: u64,
    pub frames_received: u64,
    pub frames_malformed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_metrics() {
        let metrics = ChannelMetrics::default();

        metrics.connection_opened();
        metrics.connection_lost();
        metrics.connection_opened();
        metrics.frame_sent();
        metrics.frame_sent();
        metrics.send_rejected();
        metrics.heartbeat_timeout();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_opened, 2);
        assert_eq!(snapshot.connections_lost, 1);
        assert_eq!(snapshot.frames_sent, 2);
        assert_eq!(snapshot.sends_rejected, 1);
        assert_eq!(snapshot.heartbeat_timeouts, 1);
        assert_eq!(snapshot.frames_received, 0);
    }
}
