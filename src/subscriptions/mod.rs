/// Room subscriptions replayed across reconnects
pub mod registry;
pub mod rooms;

pub use registry::{RoomSink, SubscriptionEntry, SubscriptionRegistry};
pub use rooms::{agent_room, rooms_for, CurrentUser, Role, ADMIN_ROOM, SETTINGS_ROOM};
