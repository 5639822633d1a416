/// UpdateCoordinator - lifecycle and routing for the synchronization layer
///
/// `initialize` wires channel events into the store, derives rooms for the
/// current user, starts one poller per configured topic and connects the
/// channel. `teardown` undoes all of it and may be called at any point,
/// including mid-backoff or mid-poll: every session owns a cancellation
/// token, and late push or poll results are dropped once it is cancelled.
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::notices::SyncNotice;
use super::status::SyncStatus;
use crate::arguments::is_debug_coordinator_enabled;
use crate::config::Config;
use crate::errors::{ErrorKind, SyncError, SyncResult};
use crate::logger::{self, LogTag};
use crate::poller::{AdaptivePoller, HttpTopicFetcher, PollOutcome, PollSink, TopicFetcher};
use crate::store::{ListenerHandle, StateStore, WriteOutcome};
use crate::subscriptions::{CurrentUser, SubscriptionRegistry};
use crate::topics::{Credential, Topic};
use crate::transport::{
    ChannelEvent, ChannelEventKind, HandlerId, PushConnector, PushUpdate, TransportChannel,
    WebSocketConnector,
};

const NOTICE_CAPACITY: usize = 256;

/// State shared with channel handlers and poll sinks
struct CoordinatorShared {
    store: Arc<StateStore>,

    /// Last push per topic, consulted for poll suppression and ordering
    last_push: Mutex<HashMap<Topic, Instant>>,

    /// Mirrors Connected/Disconnected channel events
    push_connected: AtomicBool,

    /// Set once an AuthRequired notice went out for the current credential
    auth_notified: AtomicBool,

    /// Listener handles registered through the coordinator
    owned_handles: Mutex<Vec<ListenerHandle>>,

    notices: broadcast::Sender<SyncNotice>,
}

impl CoordinatorShared {
    fn notify(&self, notice: SyncNotice) {
        // No receivers is fine
        let _ = self.notices.send(notice);
    }

    fn notify_auth(&self, source: &str) {
        if self.auth_notified.swap(true, Ordering::SeqCst) {
            return;
        }
        logger::warning(
            LogTag::Coordinator,
            &format!("Credential rejected by {}, waiting for refresh", source),
        );
        self.notify(SyncNotice::AuthRequired {
            source: source.to_string(),
        });
    }

    fn apply_push(&self, update: PushUpdate) -> WriteOutcome {
        self.last_push
            .lock()
            .insert(update.topic.clone(), Instant::now());

        let outcome = match update.seq {
            Some(seq) => self.store.set_versioned(&update.topic, update.payload, seq),
            None => self.store.set_value(&update.topic, update.payload),
        };
        if is_debug_coordinator_enabled() {
            logger::debug(
                LogTag::Coordinator,
                &format!("push {} (seq {:?}): {:?}", update.topic, update.seq, outcome),
            );
        }
        outcome
    }

    fn pushed_since(&self, topic: &Topic, since: Instant) -> bool {
        self.last_push
            .lock()
            .get(topic)
            .map(|pushed_at| *pushed_at > since)
            .unwrap_or(false)
    }
}

/// Poll sink bound to one session
struct SessionSink {
    shared: Arc<CoordinatorShared>,
    token: CancellationToken,
}

impl PollSink for SessionSink {
    fn apply_poll(&self, topic: &Topic, value: Value, started_at: Instant) -> Option<WriteOutcome> {
        if self.token.is_cancelled() {
            return None;
        }
        // A push that landed while the request was out is newer than the result
        if self.shared.pushed_since(topic, started_at) {
            if is_debug_coordinator_enabled() {
                logger::debug(
                    LogTag::Coordinator,
                    &format!("poll result for {} superseded by push", topic),
                );
            }
            return Some(WriteOutcome::Stale);
        }
        Some(self.shared.store.set_value(topic, value))
    }

    fn is_push_fresh(&self, topic: &Topic, window: Duration) -> bool {
        if !self.shared.push_connected.load(Ordering::SeqCst) {
            return false;
        }
        self.shared
            .last_push
            .lock()
            .get(topic)
            .map(|pushed_at| pushed_at.elapsed() < window)
            .unwrap_or(false)
    }

    fn report_failure(&self, topic: &Topic, error: &SyncError) {
        if self.token.is_cancelled() {
            return;
        }
        self.shared.notify(SyncNotice::PollFailed {
            topic: topic.clone(),
            error: error.kind(),
            message: error.to_string(),
        });
        if error.is_auth() {
            self.shared.notify_auth(&format!("poller:{}", topic));
        }
    }
}

struct Session {
    token: CancellationToken,
    credential: Credential,
    user: CurrentUser,
    pollers: Vec<Arc<AdaptivePoller>>,
    handler_ids: Vec<HandlerId>,
}

pub struct UpdateCoordinator {
    config: Config,
    channel: TransportChannel,
    registry: Arc<SubscriptionRegistry>,
    fetcher: Arc<dyn TopicFetcher>,
    shared: Arc<CoordinatorShared>,
    session: Mutex<Option<Session>>,
}

impl UpdateCoordinator {
    /// Coordinator over the given push connector and topic fetcher
    ///
    /// Fails with `SyncError::Config` when the configuration does not
    /// validate.
    pub fn new(
        config: Config,
        connector: Arc<dyn PushConnector>,
        fetcher: Arc<dyn TopicFetcher>,
    ) -> SyncResult<Self> {
        config.validate().map_err(SyncError::Config)?;
        let channel = TransportChannel::new(connector, &config.transport);
        let registry = Arc::new(SubscriptionRegistry::new(Arc::new(channel.clone())));
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        Ok(Self {
            config,
            channel,
            registry,
            fetcher,
            shared: Arc::new(CoordinatorShared {
                store: StateStore::new(),
                last_push: Mutex::new(HashMap::new()),
                push_connected: AtomicBool::new(false),
                auth_notified: AtomicBool::new(false),
                owned_handles: Mutex::new(Vec::new()),
                notices,
            }),
            session: Mutex::new(None),
        })
    }

    /// Coordinator backed by the WebSocket push endpoint and the HTTP API
    pub fn from_config(config: Config) -> SyncResult<Self> {
        config.validate().map_err(SyncError::Config)?;
        let connector = Arc::new(WebSocketConnector::new(config.transport.url.clone()));
        let fetcher = Arc::new(HttpTopicFetcher::from_config(&config)?);
        Self::new(config, connector, fetcher)
    }

    /// Start synchronizing on behalf of `user`
    ///
    /// Must be called inside a Tokio runtime. Fails with
    /// `AlreadyInitialized` if a session is live.
    pub fn initialize(&self, credential: Credential, user: CurrentUser) -> SyncResult<()> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Err(SyncError::AlreadyInitialized);
        }

        let token = CancellationToken::new();
        self.shared.auth_notified.store(false, Ordering::SeqCst);
        self.shared.push_connected.store(false, Ordering::SeqCst);

        let sink: Arc<dyn PollSink> = Arc::new(SessionSink {
            shared: self.shared.clone(),
            token: token.clone(),
        });
        let pollers: Vec<Arc<AdaptivePoller>> = self
            .config
            .topics
            .iter()
            .map(|topic| {
                AdaptivePoller::new(
                    Topic::from(topic.name.as_str()),
                    topic.poller.clone(),
                    credential.clone(),
                    self.fetcher.clone(),
                    sink.clone(),
                )
            })
            .collect();

        let handler_ids = self.register_handlers(&token, &pollers);
        self.registry.apply_user(&user);
        for poller in &pollers {
            poller.start(&token);
        }

        self.channel.connect(credential.clone());

        logger::info(
            LogTag::Coordinator,
            &format!(
                "Synchronization started for user {} ({}), {} topics",
                user.id,
                user.role,
                pollers.len()
            ),
        );

        *session = Some(Session {
            token,
            credential,
            user,
            pollers,
            handler_ids,
        });
        Ok(())
    }

    fn register_handlers(
        &self,
        token: &CancellationToken,
        pollers: &[Arc<AdaptivePoller>],
    ) -> Vec<HandlerId> {
        let mut ids = Vec::new();

        let (shared, registry, live) = (self.shared.clone(), self.registry.clone(), token.clone());
        ids.push(self.channel.on(ChannelEventKind::Connected, move |_| {
            if live.is_cancelled() {
                return;
            }
            shared.push_connected.store(true, Ordering::SeqCst);
            registry.replay_all();
            shared.notify(SyncNotice::Connected);
        }));

        let (shared, live) = (self.shared.clone(), token.clone());
        ids.push(self.channel.on(ChannelEventKind::Push, move |event| {
            if live.is_cancelled() {
                return;
            }
            if let ChannelEvent::Push(update) = event {
                shared.apply_push(update.clone());
            }
        }));

        // Disconnects leave the store untouched; pollers take over freshness
        let (shared, live, fallback) = (self.shared.clone(), token.clone(), pollers.to_vec());
        ids.push(self.channel.on(ChannelEventKind::Disconnected, move |event| {
            shared.push_connected.store(false, Ordering::SeqCst);
            if live.is_cancelled() {
                return;
            }
            fallback.iter().for_each(|poller| poller.on_push_lost());
            if let ChannelEvent::Disconnected { reason } = event {
                shared.notify(SyncNotice::disconnected(*reason));
            }
        }));

        let (shared, live) = (self.shared.clone(), token.clone());
        ids.push(self.channel.on(ChannelEventKind::Reconnecting, move |event| {
            if live.is_cancelled() {
                return;
            }
            if let ChannelEvent::Reconnecting { attempt, delay } = event {
                shared.notify(SyncNotice::Reconnecting {
                    attempt: *attempt,
                    delay_ms: delay.as_millis() as u64,
                });
            }
        }));

        let (shared, live, fallback) = (self.shared.clone(), token.clone(), pollers.to_vec());
        ids.push(self.channel.on(ChannelEventKind::ReconnectFailed, move |event| {
            shared.push_connected.store(false, Ordering::SeqCst);
            if live.is_cancelled() {
                return;
            }
            fallback.iter().for_each(|poller| poller.on_push_lost());
            if let ChannelEvent::ReconnectFailed { attempts } = event {
                logger::warning(
                    LogTag::Coordinator,
                    "Push channel gave up; relying on polling until reconnected",
                );
                shared.notify(SyncNotice::ReconnectFailed {
                    attempts: *attempts,
                });
            }
        }));

        let (shared, live, fallback) = (self.shared.clone(), token.clone(), pollers.to_vec());
        ids.push(self.channel.on(ChannelEventKind::Error, move |event| {
            if live.is_cancelled() {
                return;
            }
            if let ChannelEvent::Error {
                kind: ErrorKind::Auth,
                ..
            } = event
            {
                shared.push_connected.store(false, Ordering::SeqCst);
                fallback.iter().for_each(|poller| poller.on_push_lost());
                shared.notify_auth("push channel");
            }
        }));

        ids
    }

    /// Stop everything started by `initialize`; no-op when not initialized
    pub fn teardown(&self) {
        let session = match self.session.lock().take() {
            Some(session) => session,
            None => return,
        };

        session.token.cancel();
        for poller in &session.pollers {
            poller.stop();
        }
        for id in &session.handler_ids {
            self.channel.off(*id);
        }
        self.registry.clear();
        self.channel.disconnect();
        self.shared.push_connected.store(false, Ordering::SeqCst);

        let handles: Vec<ListenerHandle> = self.shared.owned_handles.lock().drain(..).collect();
        for handle in &handles {
            self.shared.store.release(handle);
        }

        logger::info(
            LogTag::Coordinator,
            &format!(
                "Synchronization stopped ({} listeners released)",
                handles.len()
            ),
        );
    }

    /// Register a store listener owned by this coordinator; released on teardown
    pub fn subscribe<F>(&self, topic: &Topic, callback: F) -> ListenerHandle
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handle = self.shared.store.subscribe_listener(topic, callback);
        self.shared.owned_handles.lock().push(handle.clone());
        handle
    }

    pub fn release(&self, handle: &ListenerHandle) -> bool {
        self.shared.owned_handles.lock().retain(|owned| owned != handle);
        self.shared.store.release(handle)
    }

    pub fn get_value(&self, topic: &Topic) -> Option<Value> {
        self.shared.store.get_value(topic)
    }

    /// Switch rooms to match `user`
    pub fn set_user(&self, user: CurrentUser) -> SyncResult<()> {
        let mut session = self.session.lock();
        let session = session.as_mut().ok_or(SyncError::NotInitialized)?;
        if session.user == user {
            return Ok(());
        }
        self.registry.apply_user(&user);
        session.user = user;
        Ok(())
    }

    /// Replace the bearer credential, lift auth blocks and reconnect
    pub fn refresh_credential(&self, credential: Credential) -> SyncResult<()> {
        let mut session = self.session.lock();
        let session = session.as_mut().ok_or(SyncError::NotInitialized)?;

        session.credential = credential.clone();
        for poller in &session.pollers {
            poller.set_credential(credential.clone());
        }
        self.shared.auth_notified.store(false, Ordering::SeqCst);

        self.channel.disconnect();
        self.channel.connect(credential);
        logger::info(LogTag::Coordinator, "Credential refreshed, reconnecting");
        Ok(())
    }

    /// Poll `topic` immediately, outside its regular cadence
    pub async fn refresh(&self, topic: &Topic) -> SyncResult<PollOutcome> {
        let poller = {
            let session = self.session.lock();
            let session = session.as_ref().ok_or(SyncError::NotInitialized)?;
            session
                .pollers
                .iter()
                .find(|poller| poller.topic() == topic)
                .cloned()
                .ok_or_else(|| SyncError::Config(format!("Unknown topic '{}'", topic)))?
        };
        Ok(poller.poll_now().await)
    }

    pub fn notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.shared.notices.subscribe()
    }

    pub fn is_initialized(&self) -> bool {
        self.session.lock().is_some()
    }

    pub fn store(&self) -> Arc<StateStore> {
        self.shared.store.clone()
    }

    pub fn channel(&self) -> &TransportChannel {
        &self.channel
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status(&self) -> SyncStatus {
        let session = self.session.lock();
        SyncStatus {
            initialized: session.is_some(),
            connection: self.channel.state(),
            reconnect_attempts: self.channel.reconnect_attempts(),
            channel: self.channel.metrics(),
            subscriptions: self.registry.live(),
            pollers: session
                .as_ref()
                .map(|s| s.pollers.iter().map(|poller| poller.status()).collect())
                .unwrap_or_default(),
            store: self.shared.store.stats(),
            user: session.as_ref().map(|s| s.user.clone()),
        }
    }
}

impl Drop for UpdateCoordinator {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PollerConfig, TopicConfig, TransportConfig};
    use crate::subscriptions::Role;
    use crate::transport::{ClientMessage, ConnectionState, MemoryConnector};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    struct FixedFetcher {
        value: Mutex<Value>,
        calls: AtomicU32,
        error: Mutex<Option<SyncError>>,
    }

    impl FixedFetcher {
        fn new(value: Value) -> Arc<Self> {
            Arc::new(Self {
                value: Mutex::new(value),
                calls: AtomicU32::new(0),
                error: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl TopicFetcher for FixedFetcher {
        async fn fetch(&self, _topic: &Topic, _credential: &Credential) -> SyncResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.error.lock().take() {
                return Err(error);
            }
            Ok(self.value.lock().clone())
        }
    }

    fn config() -> Config {
        Config {
            transport: TransportConfig {
                reconnect_base_delay_ms: 100,
                reconnect_jitter_ms: 0,
                heartbeat_interval_ms: 3_600_000,
                ..TransportConfig::default()
            },
            topics: vec![TopicConfig {
                name: "system-mode".to_string(),
                endpoint: "/api/settings/mode".to_string(),
                poller: PollerConfig {
                    base_interval_ms: 1_000,
                    max_interval_ms: 8_000,
                    ..PollerConfig::default()
                },
            }],
            ..Config::default()
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_initialize_is_rejected() {
        let (connector, _servers) = MemoryConnector::new();
        let coordinator =
            UpdateCoordinator::new(config(), connector, FixedFetcher::new(json!(1))).unwrap();
        let user = CurrentUser::new("1", Role::Agent);

        coordinator.initialize(Credential::new("t"), user.clone()).unwrap();
        assert!(matches!(
            coordinator.initialize(Credential::new("t"), user),
            Err(SyncError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected_at_construction() {
        let (connector, _servers) = MemoryConnector::new();
        let mut invalid = config();
        invalid.topics[0].poller.base_interval_ms = 0;

        let result = UpdateCoordinator::new(invalid, connector, FixedFetcher::new(json!(1)));
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_calls_require_initialize() {
        let (connector, _servers) = MemoryConnector::new();
        let coordinator =
            UpdateCoordinator::new(config(), connector, FixedFetcher::new(json!(1))).unwrap();

        assert!(matches!(
            coordinator.set_user(CurrentUser::new("1", Role::Admin)),
            Err(SyncError::NotInitialized)
        ));
        assert!(matches!(
            coordinator.refresh(&Topic::from("system-mode")).await,
            Err(SyncError::NotInitialized)
        ));
        // Teardown without a session is a no-op
        coordinator.teardown();
        coordinator.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_routes_into_store_and_joins_rooms() {
        let (connector, mut servers) = MemoryConnector::new();
        let coordinator =
            UpdateCoordinator::new(config(), connector, FixedFetcher::new(json!("hitl"))).unwrap();
        coordinator
            .initialize(Credential::new("t"), CurrentUser::new("5", Role::Supervisor))
            .unwrap();

        let mut server = servers.recv().await.unwrap();
        settle().await;
        assert_eq!(
            server.drain_room_messages(),
            vec![
                ClientMessage::Join { room: "settings".to_string() },
                ClientMessage::Join { room: "admin".to_string() },
                ClientMessage::Join { room: "agent:5".to_string() },
            ]
        );

        server.push("system-mode", json!("autopilot"), Some(3));
        settle().await;
        assert_eq!(
            coordinator.get_value(&Topic::from("system-mode")),
            Some(json!("autopilot"))
        );
        assert_eq!(coordinator.store().version(&Topic::from("system-mode")), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_releases_and_discards() {
        let (connector, mut servers) = MemoryConnector::new();
        let fetcher = FixedFetcher::new(json!("hitl"));
        let coordinator = UpdateCoordinator::new(config(), connector, fetcher.clone()).unwrap();
        let topic = Topic::from("system-mode");

        coordinator
            .initialize(Credential::new("t"), CurrentUser::new("5", Role::Agent))
            .unwrap();
        coordinator.subscribe(&topic, |_| Ok(()));
        let mut server = servers.recv().await.unwrap();
        settle().await;
        server.drain_room_messages();

        coordinator.teardown();
        assert!(!coordinator.is_initialized());
        assert_eq!(coordinator.store().listener_count(&topic), 0);
        assert_eq!(coordinator.channel().state(), ConnectionState::Disconnected);
        assert_eq!(coordinator.channel().handler_count(), 0);
        assert!(coordinator.registry().live().is_empty());
        assert_eq!(
            server.drain_room_messages(),
            vec![
                ClientMessage::Leave { room: "settings".to_string() },
                ClientMessage::Leave { room: "agent:5".to_string() },
            ]
        );

        let calls = fetcher.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), calls);

        // A fresh session can start after teardown
        coordinator
            .initialize(Credential::new("t"), CurrentUser::new("5", Role::Agent))
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_result_older_than_push_is_discarded() {
        let (connector, _servers) = MemoryConnector::new();
        let coordinator =
            UpdateCoordinator::new(config(), connector, FixedFetcher::new(json!(0))).unwrap();
        let sink = SessionSink {
            shared: coordinator.shared.clone(),
            token: CancellationToken::new(),
        };
        let topic = Topic::from("system-mode");

        let started_at = Instant::now();
        tokio::time::advance(Duration::from_millis(10)).await;
        coordinator.shared.apply_push(PushUpdate {
            topic: topic.clone(),
            payload: json!("autopilot"),
            seq: None,
        });

        assert_eq!(
            sink.apply_poll(&topic, json!("hitl"), started_at),
            Some(WriteOutcome::Stale)
        );
        assert_eq!(coordinator.get_value(&topic), Some(json!("autopilot")));

        // Requests issued after the push apply normally
        assert_eq!(
            sink.apply_poll(&topic, json!("hitl"), Instant::now()),
            Some(WriteOutcome::Changed)
        );

        sink.token.cancel();
        assert_eq!(sink.apply_poll(&topic, json!("x"), Instant::now()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_loss_tightens_backed_off_pollers() {
        let (connector, mut servers) = MemoryConnector::new();
        let fetcher = FixedFetcher::new(json!("hitl"));
        let coordinator =
            UpdateCoordinator::new(config(), connector.clone(), fetcher.clone()).unwrap();
        coordinator
            .initialize(Credential::new("t"), CurrentUser::new("5", Role::Agent))
            .unwrap();
        let server = servers.recv().await.unwrap();

        // Polls at 0s, 1s, 3s, 7s and 15s leave the interval at its 8s cap
        tokio::time::sleep(Duration::from_millis(16_000)).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 5);
        assert_eq!(coordinator.status().pollers[0].interval_ms, 8_000);

        connector.fail_next(10);
        drop(server);
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 6);
        assert_eq!(coordinator.status().pollers[0].interval_ms, 2_000);
        assert_ne!(coordinator.channel().state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_notices_once_until_refresh() {
        let (connector, mut servers) = MemoryConnector::new();
        connector.fail_next_with(SyncError::Auth("expired".to_string()));
        let fetcher = FixedFetcher::new(json!("hitl"));
        *fetcher.error.lock() = Some(SyncError::Auth("expired".to_string()));
        let coordinator =
            UpdateCoordinator::new(config(), connector.clone(), fetcher.clone()).unwrap();
        let mut notices = coordinator.notices();

        coordinator
            .initialize(Credential::new("old"), CurrentUser::new("5", Role::Agent))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let mut auth_notices = 0;
        while let Ok(notice) = notices.try_recv() {
            if matches!(notice, SyncNotice::AuthRequired { .. }) {
                auth_notices += 1;
            }
        }
        assert_eq!(auth_notices, 1);
        assert_eq!(connector.open_count(), 1);
        assert!(coordinator.status().pollers[0].auth_blocked);

        coordinator.refresh_credential(Credential::new("new")).unwrap();
        let server = servers.recv().await.unwrap();
        assert_eq!(server.credential.token(), "new");
        assert!(!coordinator.status().pollers[0].auth_blocked);
    }
}
