/// Host-facing lifecycle: routing, notices and diagnostics
pub mod coordinator;
pub mod notices;
pub mod status;

pub use coordinator::UpdateCoordinator;
pub use notices::SyncNotice;
pub use status::SyncStatus;
