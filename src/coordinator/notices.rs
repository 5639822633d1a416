/// Host-facing notices
///
/// Everything that goes wrong inside the channel or the pollers is reported
/// here instead of being returned to UI code. Hosts that do not care simply
/// never call `notices()`.
use serde::Serialize;

use crate::errors::ErrorKind;
use crate::topics::Topic;
use crate::transport::DisconnectReason;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncNotice {
    Connected,
    Disconnected {
        reason: String,
    },
    Reconnecting {
        attempt: u32,
        delay_ms: u64,
    },
    /// Reconnect budget spent; values may go stale until the pollers catch up
    ReconnectFailed {
        attempts: u32,
    },
    PollFailed {
        topic: Topic,
        error: ErrorKind,
        message: String,
    },
    /// Sent once per credential; call `refresh_credential` to resume
    AuthRequired {
        source: String,
    },
}

impl SyncNotice {
    pub fn disconnected(reason: DisconnectReason) -> Self {
        let reason = match reason {
            DisconnectReason::Requested => "requested",
            DisconnectReason::ClosedByServer => "closed_by_server",
            DisconnectReason::HeartbeatTimeout => "heartbeat_timeout",
            DisconnectReason::AuthRejected => "auth_rejected",
        };
        SyncNotice::Disconnected {
            reason: reason.to_string(),
        }
    }
}
