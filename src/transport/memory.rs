/// In-process push connector
///
/// Each successful `open` hands the far end of the link to whoever holds the
/// [`ServerEnd`] receiver, which can then read client frames and push server
/// frames. Failures can be queued ahead of time to script reconnect
/// sequences. Used by the test suites and by embedders that run the sync
/// layer against a local event source.
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::connector::{PushConnector, PushLink};
use super::message::{ClientMessage, PushUpdate, ServerMessage};
use crate::errors::{SyncError, SyncResult};
use crate::topics::{Credential, Topic};

pub struct MemoryConnector {
    /// Outcomes for upcoming opens; an empty queue means "accept"
    scripted_failures: Mutex<VecDeque<SyncError>>,
    accepted: mpsc::UnboundedSender<ServerEnd>,
    opens: AtomicU32,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, server_ends) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            scripted_failures: Mutex::new(VecDeque::new()),
            accepted,
            opens: AtomicU32::new(0),
        });
        (connector, server_ends)
    }

    /// Make the next `count` opens fail with a transient transport error
    pub fn fail_next(&self, count: usize) {
        let mut failures = self.scripted_failures.lock();
        for _ in 0..count {
            failures.push_back(SyncError::Transport("connection refused".to_string()));
        }
    }

    /// Make the next open fail with `error`
    pub fn fail_next_with(&self, error: SyncError) {
        self.scripted_failures.lock().push_back(error);
    }

    /// Number of `open` calls so far, failed ones included
    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushConnector for MemoryConnector {
    async fn open(&self, credential: &Credential) -> SyncResult<PushLink> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.scripted_failures.lock().pop_front() {
            return Err(error);
        }

        let (client_tx, from_client) = mpsc::unbounded_channel();
        let (to_client, client_rx) = mpsc::unbounded_channel();
        let end = ServerEnd {
            credential: credential.clone(),
            from_client,
            to_client,
        };
        self.accepted
            .send(end)
            .map_err(|_| SyncError::Transport("memory server is gone".to_string()))?;

        Ok(PushLink {
            outbound: client_tx,
            inbound: client_rx,
        })
    }

    fn describe(&self) -> String {
        "memory://push".to_string()
    }
}

/// Server side of one in-process link
///
/// Dropping it closes the link from the server's side.
pub struct ServerEnd {
    pub credential: Credential,
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<String>,
}

impl ServerEnd {
    /// Send a raw text frame; false once the client side is gone
    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        self.to_client.send(text.into()).is_ok()
    }

    pub fn send(&self, message: &ServerMessage) -> bool {
        match message.to_json() {
            Ok(text) => self.send_raw(text),
            Err(_) => false,
        }
    }

    /// Push a topic value
    pub fn push(&self, topic: &str, payload: Value, seq: Option<u64>) -> bool {
        self.send(&ServerMessage::Update(PushUpdate {
            topic: Topic::from(topic),
            payload,
            seq,
        }))
    }

    /// Next client frame, pings included
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        let text = self.from_client.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// Next join/leave frame; pings seen on the way are answered
    pub async fn recv_room_message(&mut self) -> Option<ClientMessage> {
        loop {
            match self.recv().await? {
                ClientMessage::Ping { id } => {
                    self.send(&ServerMessage::Pong { id });
                }
                other => return Some(other),
            }
        }
    }

    /// Room frames already queued, without waiting
    pub fn drain_room_messages(&mut self) -> Vec<ClientMessage> {
        let mut messages = Vec::new();
        while let Ok(text) = self.from_client.try_recv() {
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Ping { id }) => {
                    self.send(&ServerMessage::Pong { id });
                }
                Ok(message) => messages.push(message),
                Err(_) => {}
            }
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_failures_then_accept() {
        let (connector, mut server_ends) = MemoryConnector::new();
        connector.fail_next(2);

        let credential = Credential::new("token");
        assert!(connector.open(&credential).await.is_err());
        assert!(connector.open(&credential).await.is_err());
        let mut link = connector.open(&credential).await.unwrap();
        assert_eq!(connector.open_count(), 3);

        let mut server = server_ends.recv().await.unwrap();
        assert_eq!(server.credential.token(), "token");

        link.outbound
            .send(r#"{"action":"join","room":"settings"}"#.to_string())
            .unwrap();
        assert_eq!(
            server.recv().await,
            Some(ClientMessage::Join { room: "settings".to_string() })
        );

        assert!(server.push("system-mode", json!("auto"), Some(1)));
        let frame = link.inbound.recv().await.unwrap();
        assert!(frame.contains("system-mode"));

        drop(server);
        assert!(link.inbound.recv().await.is_none());
    }
}
