//! WebSocket presence transport.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::channel::{PresenceEndpoint, PresenceLink, PresenceTransport};
use super::protocol::{ClientFrame, ServerFrame};
use crate::error::{MeetingError, MeetingResult};

pub struct WsPresenceTransport {
    base: Url,
}

impl WsPresenceTransport {
    pub fn new(endpoint: &str) -> MeetingResult<Self> {
        let base = Url::parse(endpoint).map_err(|e| {
            MeetingError::PresenceChannel(format!("invalid presence endpoint {endpoint}: {e}"))
        })?;
        match base.scheme() {
            "ws" | "wss" => Ok(Self { base }),
            other => Err(MeetingError::PresenceChannel(format!(
                "presence endpoint must use ws:// or wss://, got {other}://"
            ))),
        }
    }

    pub fn url_for(&self, endpoint: &PresenceEndpoint) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("sessionId", &endpoint.session_id)
            .append_pair("participantId", &endpoint.participant_id)
            .append_pair("displayName", &endpoint.display_name);
        if endpoint.is_host {
            url.query_pairs_mut().append_pair("host", "true");
        }
        url
    }
}

#[async_trait]
impl PresenceTransport for WsPresenceTransport {
    async fn open(&self, endpoint: &PresenceEndpoint) -> MeetingResult<PresenceLink> {
        let url = self.url_for(endpoint);
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| MeetingError::PresenceChannel(format!("websocket connect failed: {e}")))?;
        info!("Presence websocket connected to {}", self.base);

        let (mut ws_tx, mut ws_rx) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<ServerFrame>();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let leaving = frame == ClientFrame::Leave;
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode presence frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    debug!("Presence websocket send failed: {}", e);
                    return;
                }
                if leaving {
                    break;
                }
            }
            let _ = ws_tx.send(Message::Close(None)).await;
        });

        tokio::spawn(async move {
            while let Some(message) = ws_rx.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(frame) => {
                            if inbound_tx.send(frame).is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!("Ignoring invalid presence frame: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Presence websocket receive failed: {}", e);
                        break;
                    }
                }
            }
            debug!("Presence websocket reader finished");
        });

        Ok(PresenceLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
