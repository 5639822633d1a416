/// Reference-counted room subscriptions
///
/// Each (topic, room) pair carries a count of interested parties. The server
/// only knows rooms, so joins and leaves are issued per room: the first live
/// pair naming a room joins it and the last one to go leaves it. Entries are
/// kept in first-subscribed order, which is the order `replay_all` re-asserts
/// them after a reconnect.
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

use super::rooms::{rooms_for, CurrentUser};
use crate::arguments::is_debug_subscriptions_enabled;
use crate::logger::{self, LogTag};
use crate::topics::Topic;
use crate::transport::{ClientMessage, TransportChannel};

/// Where join/leave frames go
pub trait RoomSink: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Best-effort delivery; false when the frame was not sent
    fn send(&self, message: &ClientMessage) -> bool;
}

impl RoomSink for TransportChannel {
    fn is_connected(&self) -> bool {
        TransportChannel::is_connected(self)
    }

    fn send(&self, message: &ClientMessage) -> bool {
        TransportChannel::send(self, message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionEntry {
    pub topic: Topic,
    pub room: String,
    pub count: u32,
}

#[derive(Default)]
struct RegistryInner {
    entries: Vec<SubscriptionEntry>,

    /// Pairs held on behalf of the current user (see `apply_user`)
    user_rooms: Vec<(Topic, String)>,
}

impl RegistryInner {
    fn room_is_live(&self, room: &str) -> bool {
        self.entries.iter().any(|entry| entry.room == room)
    }
}

pub struct SubscriptionRegistry {
    sink: Arc<dyn RoomSink>,
    inner: Mutex<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new(sink: Arc<dyn RoomSink>) -> Self {
        Self {
            sink,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Add one reference to (topic, room); returns the new count
    pub fn subscribe(&self, topic: &Topic, room: &str) -> u32 {
        let mut inner = self.inner.lock();
        Self::subscribe_locked(&mut inner, self.sink.as_ref(), topic, room)
    }

    /// Drop one reference; false if the pair was not subscribed
    pub fn unsubscribe(&self, topic: &Topic, room: &str) -> bool {
        let mut inner = self.inner.lock();
        Self::unsubscribe_locked(&mut inner, self.sink.as_ref(), topic, room)
    }

    /// Re-assert every live room, in first-subscribed order
    ///
    /// Returns the number of joins delivered.
    pub fn replay_all(&self) -> usize {
        let inner = self.inner.lock();
        let mut rooms: Vec<&str> = Vec::new();
        for entry in &inner.entries {
            if !rooms.contains(&entry.room.as_str()) {
                rooms.push(&entry.room);
            }
        }

        let sent = rooms
            .iter()
            .filter(|room| {
                self.sink.send(&ClientMessage::Join {
                    room: room.to_string(),
                })
            })
            .count();

        logger::info(
            LogTag::Subscriptions,
            &format!("Replayed {}/{} room joins", sent, rooms.len()),
        );
        sent
    }

    /// Move the user-derived subscriptions to `user`
    ///
    /// Pairs that stay the same are untouched; only rooms that appear or
    /// disappear produce join/leave frames.
    pub fn apply_user(&self, user: &CurrentUser) {
        let target = rooms_for(user);
        let mut inner = self.inner.lock();
        let current = std::mem::take(&mut inner.user_rooms);

        for (topic, room) in current.iter().filter(|pair| !target.contains(pair)) {
            Self::unsubscribe_locked(&mut inner, self.sink.as_ref(), topic, room);
        }
        for (topic, room) in target.iter().filter(|pair| !current.contains(pair)) {
            Self::subscribe_locked(&mut inner, self.sink.as_ref(), topic, room);
        }

        logger::info(
            LogTag::Subscriptions,
            &format!("Rooms for user {} ({}): {}", user.id, user.role, describe(&target)),
        );
        inner.user_rooms = target;
    }

    /// Leave every live room and forget all subscriptions
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let mut left: Vec<String> = Vec::new();
        for entry in &inner.entries {
            if !left.contains(&entry.room) {
                left.push(entry.room.clone());
            }
        }
        if self.sink.is_connected() {
            for room in &left {
                self.sink.send(&ClientMessage::Leave { room: room.clone() });
            }
        }
        inner.entries.clear();
        inner.user_rooms.clear();

        if is_debug_subscriptions_enabled() {
            logger::debug(
                LogTag::Subscriptions,
                &format!("Cleared {} rooms", left.len()),
            );
        }
    }

    /// Live subscriptions in first-subscribed order
    pub fn live(&self) -> Vec<SubscriptionEntry> {
        self.inner.lock().entries.clone()
    }

    /// Distinct live rooms in first-subscribed order
    pub fn live_rooms(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut rooms: Vec<String> = Vec::new();
        for entry in &inner.entries {
            if !rooms.contains(&entry.room) {
                rooms.push(entry.room.clone());
            }
        }
        rooms
    }

    pub fn count(&self, topic: &Topic, room: &str) -> u32 {
        self.inner
            .lock()
            .entries
            .iter()
            .find(|entry| &entry.topic == topic && entry.room == room)
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    fn subscribe_locked(
        inner: &mut RegistryInner,
        sink: &dyn RoomSink,
        topic: &Topic,
        room: &str,
    ) -> u32 {
        if let Some(entry) = inner
            .entries
            .iter_mut()
            .find(|entry| &entry.topic == topic && entry.room == room)
        {
            entry.count += 1;
            return entry.count;
        }

        let needs_join = !inner.room_is_live(room);
        inner.entries.push(SubscriptionEntry {
            topic: topic.clone(),
            room: room.to_string(),
            count: 1,
        });

        if needs_join && sink.is_connected() {
            let sent = sink.send(&ClientMessage::Join {
                room: room.to_string(),
            });
            if is_debug_subscriptions_enabled() {
                logger::debug(
                    LogTag::Subscriptions,
                    &format!("join {} for {} (sent={})", room, topic, sent),
                );
            }
        }
        1
    }

    fn unsubscribe_locked(
        inner: &mut RegistryInner,
        sink: &dyn RoomSink,
        topic: &Topic,
        room: &str,
    ) -> bool {
        let index = match inner
            .entries
            .iter()
            .position(|entry| &entry.topic == topic && entry.room == room)
        {
            Some(index) => index,
            None => return false,
        };

        inner.entries[index].count -= 1;
        if inner.entries[index].count > 0 {
            return true;
        }
        inner.entries.remove(index);

        // Failing to leave is harmless: the server drops rooms on disconnect
        if !inner.room_is_live(room) && sink.is_connected() {
            let sent = sink.send(&ClientMessage::Leave {
                room: room.to_string(),
            });
            if is_debug_subscriptions_enabled() {
                logger::debug(
                    LogTag::Subscriptions,
                    &format!("leave {} for {} (sent={})", room, topic, sent),
                );
            }
        }
        true
    }
}

fn describe(pairs: &[(Topic, String)]) -> String {
    pairs
        .iter()
        .map(|(topic, room)| format!("{}@{}", topic, room))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriptions::rooms::Role;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        connected: AtomicBool,
        sent: Mutex<Vec<ClientMessage>>,
    }

    impl RecordingSink {
        fn connected() -> Arc<Self> {
            let sink = Arc::new(Self::default());
            sink.connected.store(true, Ordering::SeqCst);
            sink
        }

        fn take(&self) -> Vec<ClientMessage> {
            std::mem::take(&mut *self.sent.lock())
        }
    }

    impl RoomSink for RecordingSink {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn send(&self, message: &ClientMessage) -> bool {
            if !self.is_connected() {
                return false;
            }
            self.sent.lock().push(message.clone());
            true
        }
    }

    fn join(room: &str) -> ClientMessage {
        ClientMessage::Join { room: room.to_string() }
    }

    fn leave(room: &str) -> ClientMessage {
        ClientMessage::Leave { room: room.to_string() }
    }

    #[test]
    fn test_join_only_on_first_reference() {
        let sink = RecordingSink::connected();
        let registry = SubscriptionRegistry::new(sink.clone());
        let topic = Topic::from("system-mode");

        assert_eq!(registry.subscribe(&topic, "settings"), 1);
        assert_eq!(registry.subscribe(&topic, "settings"), 2);
        assert_eq!(sink.take(), vec![join("settings")]);

        assert!(registry.unsubscribe(&topic, "settings"));
        assert!(sink.take().is_empty());
        assert!(registry.unsubscribe(&topic, "settings"));
        assert_eq!(sink.take(), vec![leave("settings")]);
        assert!(!registry.unsubscribe(&topic, "settings"));
    }

    #[test]
    fn test_subscribe_while_disconnected_defers_to_replay() {
        let sink = Arc::new(RecordingSink::default());
        let registry = SubscriptionRegistry::new(sink.clone());
        registry.subscribe(&Topic::from("system-mode"), "settings");
        registry.subscribe(&Topic::from("connected-agents"), "admin");
        assert!(sink.take().is_empty());

        sink.connected.store(true, Ordering::SeqCst);
        assert_eq!(registry.replay_all(), 2);
        assert_eq!(sink.take(), vec![join("settings"), join("admin")]);
    }

    #[test]
    fn test_replay_matches_live_set_in_order() {
        let sink = RecordingSink::connected();
        let registry = SubscriptionRegistry::new(sink.clone());
        let a = Topic::from("a");
        let b = Topic::from("b");
        let c = Topic::from("c");

        registry.subscribe(&c, "room-c");
        registry.subscribe(&a, "room-a");
        registry.subscribe(&b, "room-b");
        registry.subscribe(&a, "room-a");
        registry.unsubscribe(&b, "room-b");
        registry.unsubscribe(&a, "room-a");
        sink.take();

        registry.replay_all();
        assert_eq!(sink.take(), vec![join("room-c"), join("room-a")]);
    }

    #[test]
    fn test_shared_room_joined_once() {
        let sink = RecordingSink::connected();
        let registry = SubscriptionRegistry::new(sink.clone());
        registry.subscribe(&Topic::from("a"), "shared");
        registry.subscribe(&Topic::from("b"), "shared");
        assert_eq!(sink.take(), vec![join("shared")]);

        registry.replay_all();
        assert_eq!(sink.take(), vec![join("shared")]);

        registry.unsubscribe(&Topic::from("a"), "shared");
        assert!(sink.take().is_empty());
        registry.unsubscribe(&Topic::from("b"), "shared");
        assert_eq!(sink.take(), vec![leave("shared")]);
    }

    #[test]
    fn test_role_change_applies_diff() {
        let sink = RecordingSink::connected();
        let registry = SubscriptionRegistry::new(sink.clone());

        registry.apply_user(&CurrentUser::new("9", Role::Agent));
        assert_eq!(sink.take(), vec![join("settings"), join("agent:9")]);

        registry.apply_user(&CurrentUser::new("9", Role::Admin));
        assert_eq!(sink.take(), vec![join("admin")]);

        registry.apply_user(&CurrentUser::new("9", Role::Agent));
        assert_eq!(sink.take(), vec![leave("admin")]);
        assert_eq!(registry.live_rooms(), vec!["settings", "agent:9"]);
    }

    #[test]
    fn test_clear_leaves_everything() {
        let sink = RecordingSink::connected();
        let registry = SubscriptionRegistry::new(sink.clone());
        registry.apply_user(&CurrentUser::new("1", Role::Supervisor));
        registry.subscribe(&Topic::from("system-mode"), "settings");
        sink.take();

        registry.clear();
        assert_eq!(
            sink.take(),
            vec![leave("settings"), leave("admin"), leave("agent:1")]
        );
        assert!(registry.live().is_empty());
        assert_eq!(registry.count(&Topic::from("system-mode"), "settings"), 0);
    }
}
