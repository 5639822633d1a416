/// Push channel wire schema
///
/// Outbound (client → server) frames are tagged by `action`:
/// `{"action":"join","room":"settings"}`, `{"action":"leave",...}`,
/// `{"action":"ping","id":3}`.
///
/// Inbound (server → client) frames are tagged by `type`; topic pushes are
/// `{"type":"update","topic":"system-mode","payload":"hitl","seq":12}` where
/// `seq` is optional.
use serde::{Deserialize, Serialize};

use crate::errors::{SyncError, SyncResult};
use crate::topics::Topic;

// ============================================================================
// CLIENT MESSAGES (Client → Server)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a broadcast room
    Join { room: String },

    /// Leave a broadcast room
    Leave { room: String },

    /// Heartbeat probe, answered by a pong with the same id
    Ping { id: u64 },
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Room carried by join/leave frames
    pub fn room(&self) -> Option<&str> {
        match self {
            ClientMessage::Join { room } | ClientMessage::Leave { room } => Some(room),
            ClientMessage::Ping { .. } => None,
        }
    }
}

// ============================================================================
// SERVER MESSAGES (Server → Client)
// ============================================================================

/// A topic value pushed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushUpdate {
    pub topic: Topic,

    #[serde(default)]
    pub payload: serde_json::Value,

    /// Monotonic per-topic sequence, when the server provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Topic value push
    Update(PushUpdate),

    /// Heartbeat answer
    Pong { id: u64 },

    /// Server-side error report
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn parse(text: &str) -> SyncResult<Self> {
        serde_json::from_str(text).map_err(|e| SyncError::Malformed(format!("{}: {}", e, text)))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Server error codes that mean the credential is no longer accepted
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            ServerMessage::Error { code, .. } if code == "unauthorized" || code == "token_expired"
        )
    }
}
