/// WebSocket push connector
///
/// Opens the helpdesk `/ws` endpoint with the bearer credential in the
/// `Authorization` header and bridges the socket to a [`PushLink`] with one
/// background task per connection.
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::connect_async;

use super::connector::{PushConnector, PushLink};
use crate::arguments::is_debug_transport_enabled;
use crate::errors::{SyncError, SyncResult};
use crate::logger::{self, LogTag};
use crate::topics::Credential;

pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl PushConnector for WebSocketConnector {
    async fn open(&self, credential: &Credential) -> SyncResult<PushLink> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SyncError::Transport(format!("Invalid push url '{}': {}", self.url, e)))?;

        let header = HeaderValue::from_str(&credential.bearer())
            .map_err(|_| SyncError::Auth("credential is not a valid header value".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, header);

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| map_ws_error(&self.url, e))?;

        let (mut ws_tx, mut ws_rx) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let url = self.url.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = out_rx.recv() => match frame {
                        Some(text) => {
                            if let Err(e) = ws_tx.send(Message::Text(text)).await {
                                logger::warning(
                                    LogTag::Transport,
                                    &format!("{}: failed to send frame: {}", url, e),
                                );
                                break;
                            }
                        }
                        None => {
                            // Channel dropped the link: close deliberately
                            let _ = ws_tx.send(Message::Close(None)).await;
                            break;
                        }
                    },

                    msg = ws_rx.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(text).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            if is_debug_transport_enabled() {
                                logger::debug(LogTag::Transport, &format!("{}: server closed", url));
                            }
                            break;
                        }
                        Some(Err(e)) => {
                            logger::warning(
                                LogTag::Transport,
                                &format!("{}: websocket error: {}", url, e),
                            );
                            break;
                        }
                        // Ping/pong frames are answered by tungstenite; binary is unused
                        Some(Ok(_)) => {}
                    },
                }
            }
        });

        Ok(PushLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

fn map_ws_error(url: &str, error: WsError) -> SyncError {
    match error {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                SyncError::Auth(format!("push endpoint returned HTTP {}", status))
            } else {
                SyncError::Http {
                    status,
                    endpoint: url.to_string(),
                }
            }
        }
        other => SyncError::Transport(other.to_string()),
    }
}
