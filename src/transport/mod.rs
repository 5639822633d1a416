/// Push transport: connection state machine, wire schema, heartbeat,
/// reconnect policy and the channel that ties them together
pub mod backoff;
pub mod channel;
pub mod connector;
pub mod health;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod state;
pub mod websocket;

pub use backoff::ReconnectPolicy;
pub use channel::{
    ChannelEvent, ChannelEventKind, DisconnectReason, EventHandler, HandlerId, TransportChannel,
};
pub use connector::{PushConnector, PushLink};
pub use health::{HeartbeatConfig, HeartbeatMonitor};
pub use memory::{MemoryConnector, ServerEnd};
pub use message::{ClientMessage, PushUpdate, ServerMessage};
pub use metrics::{ChannelMetrics, ChannelMetricsSnapshot};
pub use state::{ConnectionState, Transition};
pub use websocket::WebSocketConnector;
