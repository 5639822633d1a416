//! End-to-end scenarios over the in-process push connector

use async_trait::async_trait;
use helpdesk_sync::config::{Config, PollerConfig, TopicConfig, TransportConfig};
use helpdesk_sync::coordinator::{SyncNotice, UpdateCoordinator};
use helpdesk_sync::errors::SyncResult;
use helpdesk_sync::poller::{PollerState, TopicFetcher};
use helpdesk_sync::subscriptions::{CurrentUser, Role, SubscriptionRegistry};
use helpdesk_sync::topics::{Credential, Topic};
use helpdesk_sync::transport::{
    ChannelEvent, ChannelEventKind, ClientMessage, ConnectionState, MemoryConnector,
    TransportChannel,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct StaticFetcher {
    value: Mutex<Value>,
    calls: AtomicU32,
}

impl StaticFetcher {
    fn new(value: Value) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(value),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TopicFetcher for StaticFetcher {
    async fn fetch(&self, _topic: &Topic, _credential: &Credential) -> SyncResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.value.lock().clone())
    }
}

fn transport() -> TransportConfig {
    TransportConfig {
        reconnect_base_delay_ms: 100,
        reconnect_max_delay_ms: 1_000,
        reconnect_max_attempts: 5,
        reconnect_jitter_ms: 0,
        heartbeat_interval_ms: 3_600_000,
        ..TransportConfig::default()
    }
}

fn system_mode_config() -> Config {
    Config {
        transport: transport(),
        topics: vec![TopicConfig {
            name: "system-mode".to_string(),
            endpoint: "/api/settings/mode".to_string(),
            poller: PollerConfig {
                base_interval_ms: 1_000,
                max_interval_ms: 8_000,
                backoff_multiplier: 2.0,
                suppress_when_push_healthy: true,
            },
        }],
        ..Config::default()
    }
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn system_mode_change_detection_and_suppression() {
    let (connector, mut servers) = MemoryConnector::new();
    let fetcher = StaticFetcher::new(json!("hitl"));
    let coordinator =
        UpdateCoordinator::new(system_mode_config(), connector, fetcher.clone()).unwrap();
    let topic = Topic::from("system-mode");

    let seen = Arc::new(Mutex::new(Vec::<Value>::new()));
    let sink = seen.clone();
    coordinator.subscribe(&topic, move |value| {
        sink.lock().push(value.clone());
        Ok(())
    });

    // Absent, then set directly
    assert_eq!(coordinator.get_value(&topic), None);
    coordinator.store().set_value(&topic, json!("hitl"));
    assert_eq!(*seen.lock(), vec![json!("hitl")]);

    // First poll returns the same value: no listener call, interval doubles
    coordinator
        .initialize(Credential::new("t"), CurrentUser::new("1", Role::Agent))
        .unwrap();
    let server = servers.recv().await.unwrap();
    settle().await;
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(coordinator.status().pollers[0].interval_ms, 2_000);

    // Push flips the mode
    tokio::time::sleep(Duration::from_millis(500)).await;
    server.push("system-mode", json!("autopilot"), None);
    settle().await;
    assert_eq!(*seen.lock(), vec![json!("hitl"), json!("autopilot")]);

    // The next tick finds a fresh push and skips the fetch
    tokio::time::sleep(Duration::from_millis(1_600)).await;
    let status = coordinator.status();
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(status.pollers[0].suppressed, 1);
    assert_eq!(status.pollers[0].state, PollerState::Suspended);
    assert_eq!(coordinator.get_value(&topic), Some(json!("autopilot")));

    coordinator.teardown();
}

#[tokio::test(start_paused = true)]
async fn rooms_replayed_in_order_after_reconnect() {
    let (connector, mut servers) = MemoryConnector::new();
    let channel = TransportChannel::new(connector.clone(), &transport());
    let registry = Arc::new(SubscriptionRegistry::new(Arc::new(channel.clone())));

    let replayer = registry.clone();
    channel.on(ChannelEventKind::Connected, move |_| {
        replayer.replay_all();
    });
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let recorder = attempts.clone();
    channel.on(ChannelEventKind::Reconnecting, move |event| {
        if let ChannelEvent::Reconnecting { attempt, .. } = event {
            recorder.lock().push(*attempt);
        }
    });

    registry.subscribe(&Topic::from("system-mode"), "settings");
    registry.subscribe(&Topic::from("connected-agents"), "admin");
    registry.subscribe(&Topic::from("system-mode"), "settings");
    registry.subscribe(&Topic::from("conversation-updates"), "agent:3");
    registry.unsubscribe(&Topic::from("conversation-updates"), "agent:3");

    channel.connect(Credential::new("t"));
    let mut first = servers.recv().await.unwrap();
    settle().await;
    assert_eq!(first.drain_room_messages().len(), 2);

    // Drop the link; the first reconnect attempt fails, the second succeeds
    connector.fail_next(1);
    drop(first);
    let mut second = servers.recv().await.unwrap();
    settle().await;

    assert_eq!(channel.state(), ConnectionState::Connected);
    assert_eq!(*attempts.lock(), vec![1, 2]);
    assert_eq!(
        second.drain_room_messages(),
        vec![
            ClientMessage::Join { room: "settings".to_string() },
            ClientMessage::Join { room: "admin".to_string() },
        ]
    );

    channel.disconnect();
}

#[tokio::test(start_paused = true)]
async fn teardown_during_reconnect_backoff() {
    let (connector, mut servers) = MemoryConnector::new();
    let fetcher = StaticFetcher::new(json!("hitl"));
    let coordinator =
        UpdateCoordinator::new(system_mode_config(), connector.clone(), fetcher).unwrap();
    let mut notices = coordinator.notices();

    coordinator
        .initialize(Credential::new("t"), CurrentUser::new("1", Role::Admin))
        .unwrap();
    let server = servers.recv().await.unwrap();
    settle().await;

    connector.fail_next(10);
    drop(server);
    settle().await;
    assert_eq!(coordinator.channel().state(), ConnectionState::Reconnecting);

    coordinator.teardown();
    let opens = connector.open_count();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(connector.open_count(), opens);
    assert_eq!(coordinator.channel().state(), ConnectionState::Disconnected);
    assert!(!coordinator.status().initialized);

    let mut saw_disconnect = false;
    while let Ok(notice) = notices.try_recv() {
        if matches!(notice, SyncNotice::Disconnected { ref reason } if reason == "closed_by_server") {
            saw_disconnect = true;
        }
    }
    assert!(saw_disconnect);

    // Values survive disconnects and teardown
    assert_eq!(
        coordinator.get_value(&Topic::from("system-mode")),
        Some(json!("hitl"))
    );
}
