/// Push channel connection state machine
///
/// Every state change of the channel goes through [`ConnectionState::apply`],
/// so the full transition table lives in one exhaustive match.
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Lifecycle events that drive the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Host called `connect`
    ConnectRequested,
    /// Underlying link opened
    Opened,
    /// Link dropped, failed to open, or missed a heartbeat
    Lost,
    /// Reconnect attempts exhausted, or the credential was rejected
    GaveUp,
    /// Host called `disconnect`
    Closed,
}

impl ConnectionState {
    /// Next state, or `None` when the transition is not valid from here
    pub fn apply(self, transition: Transition) -> Option<ConnectionState> {
        use ConnectionState::*;
        use Transition::*;

        match (self, transition) {
            (Disconnected, ConnectRequested) => Some(Connecting),
            (Connecting | Connected | Reconnecting, ConnectRequested) => None,

            (Connecting | Reconnecting, Opened) => Some(Connected),
            (Disconnected | Connected, Opened) => None,

            (Connecting | Connected | Reconnecting, Lost) => Some(Reconnecting),
            (Disconnected, Lost) => None,

            (Connecting | Connected | Reconnecting, GaveUp) => Some(Disconnected),
            (Disconnected, GaveUp) => None,

            (_, Closed) => Some(Disconnected),
        }
    }

    pub fn is_connected(&self) -> bool {
        *self == ConnectionState::Connected
    }

    /// True while a session task is alive (connecting, connected or backing off)
    pub fn is_active(&self) -> bool {
        *self != ConnectionState::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Reconnecting => "RECONNECTING",
        };
        f.write_str(name)
    }
}
