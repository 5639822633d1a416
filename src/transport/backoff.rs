/// Reconnect backoff policy
///
/// Delay for attempt `n` (0-based) is `base * 2^n`, capped at `max`, plus a
/// uniform random jitter in `[0, jitter]` so clients dropped together do not
/// reconnect in lockstep.
use rand::Rng;
use std::time::Duration;

use crate::config::TransportConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub jitter: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
            max_attempts: config.reconnect_max_attempts,
            jitter: Duration::from_millis(config.reconnect_jitter_ms),
        }
    }

    /// Delay before attempt `attempt`, without jitter
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let factor = 2u64.saturating_pow(attempt);
        let delay_ms = base_ms
            .saturating_mul(factor)
            .min(self.max_delay.as_millis() as u64);
        Duration::from_millis(delay_ms)
    }

    /// Delay before attempt `attempt`, including jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.base_delay_for(attempt) + Duration::from_millis(jitter)
    }

    /// True once `attempts` reconnects have been made without success
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}
