/// Heartbeat liveness tracking
///
/// While connected, the channel sends a ping every heartbeat interval. Each
/// ping opens a pong window; if the window closes before the matching pong
/// arrives, the link is considered dead even though the transport never
/// reported it closed.
use std::time::Duration;
use tokio::time::Instant;

use crate::config::TransportConfig;

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Ping cadence
    pub interval: Duration,

    /// Pong window after each ping
    pub pong_timeout: Duration,
}

impl HeartbeatConfig {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            interval: config.heartbeat_interval(),
            pong_timeout: config.pong_timeout(),
        }
    }
}

/// Per-connection heartbeat state
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,

    /// Id of the ping still waiting for its pong, and when it was sent
    pending: Option<(u64, Instant)>,

    next_ping_id: u64,

    /// Last pong round trip
    last_rtt: Option<Duration>,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            pending: None,
            next_ping_id: 1,
            last_rtt: None,
        }
    }

    /// Allocate a ping id and open its pong window
    ///
    /// A ping sent while an earlier one is still pending keeps the earlier
    /// deadline, so a slow server cannot push the window forward forever.
    pub fn record_ping(&mut self) -> u64 {
        let id = self.next_ping_id;
        self.next_ping_id += 1;
        match self.pending {
            Some((_, sent_at)) => self.pending = Some((id, sent_at)),
            None => self.pending = Some((id, Instant::now())),
        }
        id
    }

    /// Record a pong; returns false for unknown or outdated ids
    pub fn record_pong(&mut self, id: u64) -> bool {
        match self.pending {
            Some((pending_id, sent_at)) if id <= pending_id => {
                self.last_rtt = Some(sent_at.elapsed());
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Deadline of the open pong window
    pub fn pong_deadline(&self) -> Option<Instant> {
        self.pending
            .map(|(_, sent_at)| sent_at + self.config.pong_timeout)
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    pub fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HeartbeatMonitor {
        HeartbeatMonitor::new(HeartbeatConfig {
            interval: Duration::from_millis(50),
            pong_timeout: Duration::from_millis(30),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_closes_window() {
        let mut health = monitor();
        assert!(health.pong_deadline().is_none());

        let id = health.record_ping();
        assert_eq!(
            health.pong_deadline(),
            Some(Instant::now() + Duration::from_millis(30))
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(health.record_pong(id));
        assert!(health.pong_deadline().is_none());
        assert!(health.last_rtt().unwrap() >= Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_pong_still_closes_window() {
        let mut health = monitor();
        let id = health.record_ping();

        tokio::time::sleep(Duration::from_millis(31)).await;
        assert!(health.pong_deadline().unwrap() < Instant::now());
        assert!(health.record_pong(id));
        assert!(health.pong_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_ping_keeps_first_deadline() {
        let mut health = monitor();
        health.record_ping();
        let deadline = health.pong_deadline().unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = health.record_ping();
        assert_eq!(health.pong_deadline(), Some(deadline));

        // Unknown ids are ignored
        assert!(!health.record_pong(second + 10));
        assert!(health.record_pong(second));
    }
}
