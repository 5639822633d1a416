/// Fallback polling: one adaptive poller per topic plus the pull seam
pub mod fetcher;
pub mod poller;

pub use fetcher::{HttpTopicFetcher, TopicFetcher};
pub use poller::{AdaptivePoller, PollOutcome, PollSink, PollerState, PollerStatus};
