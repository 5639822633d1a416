//! Real-time synchronization layer for the helpdesk dashboard and settings
//! console.
//!
//! A push channel with reconnect and heartbeat, a room registry replayed
//! after every reconnect, adaptive fallback pollers and a change-detecting
//! state store, tied together by [`coordinator::UpdateCoordinator`].

pub mod arguments;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod logger;
pub mod poller;
pub mod store;
pub mod subscriptions;
pub mod topics;
pub mod transport;
