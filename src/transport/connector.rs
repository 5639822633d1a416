/// Connector seam between the channel state machine and a concrete transport
///
/// A [`PushLink`] is a pair of text-frame queues. The link is alive while
/// `inbound` yields frames; `None` means the remote side went away. Dropping
/// the link (both halves) closes the underlying connection.
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::SyncResult;
use crate::topics::Credential;

pub struct PushLink {
    /// Frames to write to the server
    pub outbound: mpsc::UnboundedSender<String>,

    /// Frames read from the server
    pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait PushConnector: Send + Sync {
    /// Open one connection authenticated with `credential`
    ///
    /// Rejected credentials must be reported as `SyncError::Auth` (or an
    /// HTTP 401/403) so the channel stops retrying.
    async fn open(&self, credential: &Credential) -> SyncResult<PushLink>;

    /// Endpoint description for logs
    fn describe(&self) -> String;
}
