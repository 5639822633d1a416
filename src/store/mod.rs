/// Canonical topic-keyed state with change detection
///
/// - `state_store`: the store, its listeners and write outcomes
/// - `equality`: the structural equality rule that decides what counts as a change
pub mod equality;
pub mod state_store;

pub use equality::structurally_equal;
pub use state_store::{Listener, ListenerHandle, StateStore, StoreStatsSnapshot, WriteOutcome};
