/// Diagnostics snapshot
///
/// For hosts that render a "may be stale" indicator and for tests. Nothing
/// in the synchronization logic reads it back.
use serde::Serialize;

use crate::poller::PollerStatus;
use crate::store::StoreStatsSnapshot;
use crate::subscriptions::{CurrentUser, SubscriptionEntry};
use crate::transport::{ChannelMetricsSnapshot, ConnectionState};

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub initialized: bool,
    pub connection: ConnectionState,
    pub reconnect_attempts: u32,
    pub channel: ChannelMetricsSnapshot,
    pub subscriptions: Vec<SubscriptionEntry>,
    pub pollers: Vec<PollerStatus>,
    pub store: StoreStatsSnapshot,
    pub user: Option<CurrentUser>,
}

impl SyncStatus {
    /// True when values on screen may lag the server
    pub fn is_degraded(&self) -> bool {
        !self.connection.is_connected()
            || self.pollers.iter().any(|poller| poller.auth_blocked)
    }
}
