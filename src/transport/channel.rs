/// Push channel with automatic reconnection
///
/// `TransportChannel` owns one logical connection to the push endpoint. A
/// supervisor task per session opens links through the [`PushConnector`],
/// drives the heartbeat, dispatches inbound frames to registered handlers and
/// reconnects with exponential backoff until the attempt budget runs out.
///
/// Handlers are invoked from the supervisor task with no lock held, so they
/// may call back into the channel (`send`, `state`, even `disconnect`).
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::backoff::ReconnectPolicy;
use super::connector::{PushConnector, PushLink};
use super::health::{HeartbeatConfig, HeartbeatMonitor};
use super::message::{ClientMessage, PushUpdate, ServerMessage};
use super::metrics::{ChannelMetrics, ChannelMetricsSnapshot};
use super::state::{ConnectionState, Transition};
use crate::arguments::{is_debug_heartbeat_enabled, is_debug_transport_enabled};
use crate::config::TransportConfig;
use crate::errors::ErrorKind;
use crate::logger::{self, LogTag};
use crate::topics::Credential;

// ============================================================================
// EVENTS
// ============================================================================

/// Why a live connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect` was called
    Requested,
    /// The link closed underneath us
    ClosedByServer,
    /// No pong within the pong window
    HeartbeatTimeout,
    /// The server rejected the credential mid-session
    AuthRejected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected { reason: DisconnectReason },
    /// A reconnect attempt is scheduled after `delay`
    Reconnecting { attempt: u32, delay: Duration },
    /// Attempt budget spent; the channel is disconnected
    ReconnectFailed { attempts: u32 },
    Push(PushUpdate),
    Error { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelEventKind {
    Connected,
    Disconnected,
    Reconnecting,
    ReconnectFailed,
    Push,
    Error,
}

impl ChannelEvent {
    pub fn kind(&self) -> ChannelEventKind {
        match self {
            ChannelEvent::Connected => ChannelEventKind::Connected,
            ChannelEvent::Disconnected { .. } => ChannelEventKind::Disconnected,
            ChannelEvent::Reconnecting { .. } => ChannelEventKind::Reconnecting,
            ChannelEvent::ReconnectFailed { .. } => ChannelEventKind::ReconnectFailed,
            ChannelEvent::Push(_) => ChannelEventKind::Push,
            ChannelEvent::Error { .. } => ChannelEventKind::Error,
        }
    }
}

pub type HandlerId = u64;
pub type EventHandler = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

// ============================================================================
// CHANNEL
// ============================================================================

struct ChannelState {
    connection: ConnectionState,
    reconnect_attempts: u32,

    /// Writer of the current link, only while connected
    outbound: Option<mpsc::UnboundedSender<String>>,

    /// Cancels the supervisor of the current session
    session: Option<CancellationToken>,
}

struct ChannelShared {
    connector: Arc<dyn PushConnector>,
    policy: ReconnectPolicy,
    heartbeat: HeartbeatConfig,
    connect_timeout: Duration,
    state: Mutex<ChannelState>,
    handlers: Mutex<Vec<(HandlerId, ChannelEventKind, EventHandler)>>,
    next_handler_id: AtomicU64,
    metrics: ChannelMetrics,
}

#[derive(Clone)]
pub struct TransportChannel {
    shared: Arc<ChannelShared>,
}

impl TransportChannel {
    pub fn new(connector: Arc<dyn PushConnector>, config: &TransportConfig) -> Self {
        Self {
            shared: Arc::new(ChannelShared {
                connector,
                policy: ReconnectPolicy::from_config(config),
                heartbeat: HeartbeatConfig::from_config(config),
                connect_timeout: config.connect_timeout(),
                state: Mutex::new(ChannelState {
                    connection: ConnectionState::Disconnected,
                    reconnect_attempts: 0,
                    outbound: None,
                    session: None,
                }),
                handlers: Mutex::new(Vec::new()),
                next_handler_id: AtomicU64::new(1),
                metrics: ChannelMetrics::default(),
            }),
        }
    }

    /// Start a session authenticated with `credential`
    ///
    /// No-op unless the channel is disconnected, so repeated calls while
    /// connecting or connected never open a second link.
    pub fn connect(&self, credential: Credential) {
        let token = {
            let mut state = self.shared.state.lock();
            if !transition(&mut state, Transition::ConnectRequested) {
                if is_debug_transport_enabled() {
                    logger::debug(
                        LogTag::Transport,
                        &format!("connect ignored, channel is {}", state.connection),
                    );
                }
                return;
            }
            state.reconnect_attempts = 0;
            let token = CancellationToken::new();
            state.session = Some(token.clone());
            token
        };

        logger::info(
            LogTag::Transport,
            &format!("Connecting to {}", self.shared.connector.describe()),
        );
        let shared = self.shared.clone();
        tokio::spawn(run_session(shared, credential, token));
    }

    /// End the session, cancel any pending reconnect and close the link
    pub fn disconnect(&self) {
        let was_active = {
            let mut state = self.shared.state.lock();
            let was_active = state.connection.is_active();
            if let Some(token) = state.session.take() {
                token.cancel();
            }
            state.outbound = None;
            state.reconnect_attempts = 0;
            transition(&mut state, Transition::Closed);
            was_active
        };

        if was_active {
            logger::info(LogTag::Transport, "Push channel disconnected on request");
            self.shared.emit(ChannelEvent::Disconnected {
                reason: DisconnectReason::Requested,
            });
        }
    }

    /// Queue a frame on the live link
    ///
    /// Returns false without queueing anything unless connected. Frames are
    /// never buffered across reconnects; room membership is replayed instead.
    pub fn send(&self, message: &ClientMessage) -> bool {
        let state = self.shared.state.lock();
        let outbound = match (&state.outbound, state.connection.is_connected()) {
            (Some(outbound), true) => outbound,
            _ => {
                self.shared.metrics.send_rejected();
                return false;
            }
        };

        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                logger::error(
                    LogTag::Transport,
                    &format!("Failed to serialize {:?}: {}", message, e),
                );
                return false;
            }
        };

        if outbound.send(text).is_err() {
            self.shared.metrics.send_rejected();
            return false;
        }
        self.shared.metrics.frame_sent();
        true
    }

    /// Register `handler` for events of `kind`
    pub fn on<F>(&self, kind: ChannelEventKind, handler: F) -> HandlerId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let id = self.shared.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .handlers
            .lock()
            .push((id, kind, Arc::new(handler)));
        id
    }

    /// Remove a handler; false if it was not registered
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.shared.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(handler_id, _, _)| *handler_id != id);
        handlers.len() != before
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.lock().connection
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Reconnect attempts made since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.state.lock().reconnect_attempts
    }

    pub fn handler_count(&self) -> usize {
        self.shared.handlers.lock().len()
    }

    pub fn metrics(&self) -> ChannelMetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

fn transition(state: &mut ChannelState, event: Transition) -> bool {
    match state.connection.apply(event) {
        Some(next) => {
            if next != state.connection && is_debug_transport_enabled() {
                logger::debug(
                    LogTag::Transport,
                    &format!("{} -> {} ({:?})", state.connection, next, event),
                );
            }
            state.connection = next;
            true
        }
        None => false,
    }
}

impl ChannelShared {
    fn emit(&self, event: ChannelEvent) {
        let kind = event.kind();
        let handlers: Vec<EventHandler> = self
            .handlers
            .lock()
            .iter()
            .filter(|(_, handler_kind, _)| *handler_kind == kind)
            .map(|(_, _, handler)| handler.clone())
            .collect();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                logger::error(
                    LogTag::Transport,
                    &format!("{:?} handler panicked", kind),
                );
            }
        }
    }

    /// The mark_* helpers return false when the session was cancelled, in
    /// which case the supervisor must stop without touching state.
    fn mark_connected(&self, token: &CancellationToken, link: &PushLink) -> bool {
        let mut state = self.state.lock();
        if token.is_cancelled() {
            return false;
        }
        transition(&mut state, Transition::Opened);
        state.outbound = Some(link.outbound.clone());
        state.reconnect_attempts = 0;
        true
    }

    fn mark_lost(&self, token: &CancellationToken) -> bool {
        let mut state = self.state.lock();
        if token.is_cancelled() {
            return false;
        }
        state.outbound = None;
        transition(&mut state, Transition::Lost);
        true
    }

    fn mark_attempt(&self, token: &CancellationToken, attempt: u32) -> bool {
        let mut state = self.state.lock();
        if token.is_cancelled() {
            return false;
        }
        state.reconnect_attempts = attempt;
        true
    }

    fn mark_gave_up(&self, token: &CancellationToken) -> bool {
        let mut state = self.state.lock();
        if token.is_cancelled() {
            return false;
        }
        state.outbound = None;
        state.session = None;
        transition(&mut state, Transition::GaveUp);
        true
    }

    /// Stop retrying after a credential rejection
    fn give_up_auth(&self, token: &CancellationToken, was_connected: bool, message: String) {
        if !self.mark_gave_up(token) {
            return;
        }
        logger::error(
            LogTag::Transport,
            &format!("Credential rejected, reconnects suspended: {}", message),
        );
        if was_connected {
            self.emit(ChannelEvent::Disconnected {
                reason: DisconnectReason::AuthRejected,
            });
        }
        self.emit(ChannelEvent::Error {
            kind: ErrorKind::Auth,
            message,
        });
    }
}

// ============================================================================
// SESSION SUPERVISOR
// ============================================================================

enum LinkEnd {
    Cancelled,
    Lost(DisconnectReason),
    AuthRejected(String),
}

async fn run_session(shared: Arc<ChannelShared>, credential: Credential, token: CancellationToken) {
    let mut attempt: u32 = 0;

    loop {
        let opened = tokio::select! {
            _ = token.cancelled() => return,
            result = tokio::time::timeout(shared.connect_timeout, shared.connector.open(&credential)) => result,
        };

        match opened {
            Ok(Ok(link)) => {
                if !shared.mark_connected(&token, &link) {
                    return;
                }
                attempt = 0;
                shared.metrics.connection_opened();
                logger::info(LogTag::Transport, "Push channel connected");
                shared.emit(ChannelEvent::Connected);

                match drive_link(&shared, link, &token).await {
                    LinkEnd::Cancelled => return,
                    LinkEnd::AuthRejected(message) => {
                        shared.give_up_auth(&token, true, message);
                        return;
                    }
                    LinkEnd::Lost(reason) => {
                        if !shared.mark_lost(&token) {
                            return;
                        }
                        shared.metrics.connection_lost();
                        logger::warning(
                            LogTag::Transport,
                            &format!("Push channel lost: {:?}", reason),
                        );
                        shared.emit(ChannelEvent::Disconnected { reason });
                    }
                }
            }
            Ok(Err(e)) if e.is_auth() => {
                shared.give_up_auth(&token, false, e.to_string());
                return;
            }
            Ok(Err(e)) => {
                if !shared.mark_lost(&token) {
                    return;
                }
                shared.metrics.connection_lost();
                logger::warning(LogTag::Transport, &format!("Connect attempt failed: {}", e));
                shared.emit(ChannelEvent::Error {
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                if !shared.mark_lost(&token) {
                    return;
                }
                shared.metrics.connection_lost();
                let message = format!(
                    "Connect attempt timed out after {}ms",
                    shared.connect_timeout.as_millis()
                );
                logger::warning(LogTag::Transport, &message);
                shared.emit(ChannelEvent::Error {
                    kind: ErrorKind::Transient,
                    message,
                });
            }
        }

        if shared.policy.is_exhausted(attempt) {
            if shared.mark_gave_up(&token) {
                logger::error(
                    LogTag::Transport,
                    &format!("Giving up after {} reconnect attempts", attempt),
                );
                shared.emit(ChannelEvent::ReconnectFailed { attempts: attempt });
            }
            return;
        }

        let delay = shared.policy.delay_for(attempt);
        attempt += 1;
        if !shared.mark_attempt(&token, attempt) {
            return;
        }
        logger::info(
            LogTag::Transport,
            &format!(
                "Reconnect attempt {}/{} in {}ms",
                attempt,
                shared.policy.max_attempts,
                delay.as_millis()
            ),
        );
        shared.emit(ChannelEvent::Reconnecting { attempt, delay });

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Pump one open link until it ends
async fn drive_link(shared: &ChannelShared, mut link: PushLink, token: &CancellationToken) -> LinkEnd {
    let mut heartbeat = HeartbeatMonitor::new(shared.heartbeat.clone());
    let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat.interval(), heartbeat.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let pong_deadline = heartbeat.pong_deadline();

        tokio::select! {
            biased;

            _ = token.cancelled() => return LinkEnd::Cancelled,

            frame = link.inbound.recv() => {
                let text = match frame {
                    Some(text) => text,
                    None => return LinkEnd::Lost(DisconnectReason::ClosedByServer),
                };
                shared.metrics.frame_received();

                match ServerMessage::parse(&text) {
                    Ok(ServerMessage::Pong { id }) => {
                        if heartbeat.record_pong(id) && is_debug_heartbeat_enabled() {
                            logger::debug(
                                LogTag::Heartbeat,
                                &format!("pong {} rtt={:?}", id, heartbeat.last_rtt()),
                            );
                        }
                    }
                    Ok(ServerMessage::Update(update)) => {
                        shared.emit(ChannelEvent::Push(update));
                    }
                    Ok(message) if message.is_auth_error() => {
                        let detail = match message {
                            ServerMessage::Error { code, message } => format!("{}: {}", code, message),
                            other => format!("{:?}", other),
                        };
                        return LinkEnd::AuthRejected(detail);
                    }
                    Ok(ServerMessage::Error { code, message }) => {
                        logger::warning(
                            LogTag::Transport,
                            &format!("Server error {}: {}", code, message),
                        );
                        shared.emit(ChannelEvent::Error {
                            kind: ErrorKind::Permanent,
                            message: format!("{}: {}", code, message),
                        });
                    }
                    Err(e) => {
                        shared.metrics.frame_malformed();
                        logger::warning(LogTag::Transport, &format!("Dropping frame: {}", e));
                        shared.emit(ChannelEvent::Error {
                            kind: e.kind(),
                            message: e.to_string(),
                        });
                    }
                }
            }

            _ = ticker.tick() => {
                let id = heartbeat.record_ping();
                let text = match (ClientMessage::Ping { id }).to_json() {
                    Ok(text) => text,
                    Err(_) => continue,
                };
                if link.outbound.send(text).is_err() {
                    return LinkEnd::Lost(DisconnectReason::ClosedByServer);
                }
                shared.metrics.frame_sent();
                if is_debug_heartbeat_enabled() {
                    logger::debug(LogTag::Heartbeat, &format!("ping {}", id));
                }
            }

            _ = tokio::time::sleep_until(pong_deadline.unwrap_or_else(Instant::now)), if pong_deadline.is_some() => {
                shared.metrics.heartbeat_timeout();
                logger::warning(
                    LogTag::Heartbeat,
                    &format!("No pong within {}ms", shared.heartbeat.pong_timeout.as_millis()),
                );
                return LinkEnd::Lost(DisconnectReason::HeartbeatTimeout);
            }
        }
    }
}
