//! Presence and chat channel.
//!
//! Connects independently of the media session and keeps the roster and the
//! chat list for one meeting. Chat is ordered by the channel-assigned
//! sequence; a locally sent message is shown immediately and replaced by its
//! echo once the channel has sequenced it.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{ChatMessage, ClientFrame, RosterEntry, ServerFrame, StatusFlags};
use crate::cancel::run_guarded;
use crate::controls::DeviceState;
use crate::error::{MeetingError, MeetingResult};

/// Who is connecting to which session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEndpoint {
    pub session_id: String,
    pub participant_id: String,
    pub display_name: String,
    pub is_host: bool,
}

/// An open presence connection. Closing `inbound` means the channel dropped.
#[derive(Debug)]
pub struct PresenceLink {
    pub outbound: mpsc::UnboundedSender<ClientFrame>,
    pub inbound: mpsc::UnboundedReceiver<ServerFrame>,
}

#[async_trait]
pub trait PresenceTransport: Send + Sync {
    async fn open(&self, endpoint: &PresenceEndpoint) -> MeetingResult<PresenceLink>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PresenceSnapshot {
    pub connected: bool,
    pub roster: Vec<RosterEntry>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Default)]
struct PresenceState {
    endpoint: Option<PresenceEndpoint>,
    outbound: Option<mpsc::UnboundedSender<ClientFrame>>,
    connected: bool,
    roster: BTreeMap<String, RosterEntry>,
    messages: Vec<ChatMessage>,
    generation: u64,
    reader: Option<JoinHandle<()>>,
}

impl PresenceState {
    fn apply(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Roster { participants } => {
                self.roster = participants
                    .into_iter()
                    .map(|entry| (entry.participant_id.clone(), entry))
                    .collect();
            }
            ServerFrame::History { messages } => {
                for message in messages {
                    self.insert_message(message);
                }
            }
            ServerFrame::ParticipantJoined { participant } => {
                debug!("Presence: {} joined", participant.participant_id);
                self.roster
                    .insert(participant.participant_id.clone(), participant);
            }
            ServerFrame::ParticipantLeft { participant_id } => {
                debug!("Presence: {} left", participant_id);
                self.roster.remove(&participant_id);
            }
            ServerFrame::ParticipantStatus {
                participant_id,
                flags,
            } => {
                if let Some(entry) = self.roster.get_mut(&participant_id) {
                    apply_flags(entry, flags);
                }
            }
            ServerFrame::Chat { message } => self.insert_message(message),
        }
    }

    /// Sequenced messages form a sorted prefix; pending local echoes follow.
    fn insert_message(&mut self, message: ChatMessage) {
        if let Some(client_id) = &message.client_id {
            self.messages
                .retain(|m| !(m.is_pending() && m.client_id.as_ref() == Some(client_id)));
        }
        let Some(sequence) = message.sequence else {
            self.messages.push(message);
            return;
        };
        let confirmed = self
            .messages
            .iter()
            .take_while(|m| m.sequence.is_some())
            .count();
        if let Err(position) = self.messages[..confirmed]
            .binary_search_by_key(&sequence, |m| m.sequence.unwrap_or_default())
        {
            self.messages.insert(position, message);
        }
    }

    fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot {
            connected: self.connected,
            roster: self.roster.values().cloned().collect(),
            messages: self.messages.clone(),
        }
    }
}

fn apply_flags(entry: &mut RosterEntry, flags: StatusFlags) {
    entry.is_muted = flags.is_muted;
    entry.is_camera_off = flags.is_camera_off;
    entry.is_screen_sharing = flags.is_screen_sharing;
}

struct PresenceInner {
    transport: Arc<dyn PresenceTransport>,
    state: Mutex<PresenceState>,
}

/// How long `connect` waits for the socket and the first roster frame.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct PresenceChannel {
    inner: Arc<PresenceInner>,
    connect_timeout: Duration,
}

impl PresenceChannel {
    pub fn new(transport: Arc<dyn PresenceTransport>) -> Self {
        Self {
            inner: Arc::new(PresenceInner {
                transport,
                state: Mutex::new(PresenceState::default()),
            }),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Open the channel and wait for the initial roster.
    pub async fn connect(
        &self,
        endpoint: PresenceEndpoint,
        cancel: &CancellationToken,
    ) -> MeetingResult<PresenceSnapshot> {
        if self.inner.state.lock().await.connected {
            return Err(MeetingError::InvalidState(
                "presence channel already connected".to_string(),
            ));
        }

        info!(
            "Connecting presence channel for {} as {}",
            endpoint.session_id, endpoint.participant_id
        );
        let transport = Arc::clone(&self.inner.transport);
        let target = endpoint.clone();
        let deadline = self.connect_timeout;
        let (link, first) = run_guarded(
            cancel,
            async move {
                // Dropping the half-open link on timeout closes it.
                tokio::time::timeout(deadline, async {
                    let mut link = transport.open(&target).await?;
                    let first = link.inbound.recv().await.ok_or_else(|| {
                        MeetingError::PresenceChannel("closed before roster arrived".to_string())
                    })?;
                    Ok::<_, MeetingError>((link, first))
                })
                .await
                .map_err(|_| {
                    MeetingError::PresenceChannel(format!(
                        "no roster within {}s",
                        deadline.as_secs_f32()
                    ))
                })?
            },
            |(link, _): (PresenceLink, ServerFrame)| async move {
                debug!("Presence connect resolved after cancellation; leaving");
                let _ = link.outbound.send(ClientFrame::Leave);
            },
        )
        .await?;

        let mut state = self.inner.state.lock().await;
        if cancel.is_cancelled() || state.connected {
            let _ = link.outbound.send(ClientFrame::Leave);
            return Err(MeetingError::Cancelled);
        }

        state.generation += 1;
        state.endpoint = Some(endpoint);
        state.outbound = Some(link.outbound);
        state.connected = true;
        state.roster.clear();
        state.messages.clear();
        state.apply(first);
        state.reader = Some(tokio::spawn(read_frames(
            Arc::downgrade(&self.inner),
            link.inbound,
            state.generation,
        )));

        info!(
            "Presence channel connected ({} in roster)",
            state.roster.len()
        );
        Ok(state.snapshot())
    }

    /// Send a chat message. Blank text is ignored and returns `Ok(false)`.
    pub async fn send_message(&self, text: &str) -> MeetingResult<bool> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }

        let mut state = self.inner.state.lock().await;
        let (Some(endpoint), Some(outbound)) = (state.endpoint.clone(), state.outbound.clone())
        else {
            return Err(MeetingError::PresenceChannel(
                "chat is not connected".to_string(),
            ));
        };

        let client_id = uuid::Uuid::new_v4().to_string();
        let frame = ClientFrame::Chat {
            client_id: client_id.clone(),
            text: text.to_string(),
        };
        if outbound.send(frame).is_err() {
            state.connected = false;
            state.outbound = None;
            return Err(MeetingError::PresenceChannel(
                "chat connection closed".to_string(),
            ));
        }

        state.insert_message(ChatMessage {
            sender_id: endpoint.participant_id,
            display_name: endpoint.display_name,
            text: text.to_string(),
            sequence: None,
            timestamp: chrono::Utc::now(),
            client_id: Some(client_id),
        });
        Ok(true)
    }

    /// Push the local participant's device flags to the channel.
    pub async fn update_status(&self, device: DeviceState) -> MeetingResult<()> {
        let mut state = self.inner.state.lock().await;
        let outbound = state.outbound.clone().ok_or(MeetingError::NotConnected)?;
        let flags = StatusFlags {
            is_muted: device.is_muted,
            is_camera_off: device.is_camera_off,
            is_screen_sharing: device.is_screen_sharing,
        };
        outbound
            .send(ClientFrame::Status(flags))
            .map_err(|_| MeetingError::PresenceChannel("status update failed".to_string()))?;

        if let Some(own_id) = state.endpoint.as_ref().map(|e| e.participant_id.clone()) {
            if let Some(entry) = state.roster.get_mut(&own_id) {
                apply_flags(entry, flags);
            }
        }
        Ok(())
    }

    pub async fn roster(&self) -> Vec<RosterEntry> {
        self.inner.state.lock().await.roster.values().cloned().collect()
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.inner.state.lock().await.messages.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.state.lock().await.connected
    }

    pub async fn snapshot(&self) -> PresenceSnapshot {
        self.inner.state.lock().await.snapshot()
    }

    /// Leave the channel. Returns whether it was connected.
    pub async fn disconnect(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        state.generation += 1;
        if let Some(reader) = state.reader.take() {
            reader.abort();
        }
        let was_connected = state.connected;
        if let Some(outbound) = state.outbound.take() {
            let _ = outbound.send(ClientFrame::Leave);
        }
        state.connected = false;
        state.roster.clear();
        if was_connected {
            info!("Presence channel disconnected");
        }
        was_connected
    }
}

impl Drop for PresenceInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(reader) = state.reader.take() {
            reader.abort();
        }
        if let Some(outbound) = state.outbound.take() {
            let _ = outbound.send(ClientFrame::Leave);
        }
    }
}

async fn read_frames(
    inner: Weak<PresenceInner>,
    mut inbound: mpsc::UnboundedReceiver<ServerFrame>,
    generation: u64,
) {
    while let Some(frame) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut state = inner.state.lock().await;
        if state.generation != generation {
            return;
        }
        state.apply(frame);
    }

    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut state = inner.state.lock().await;
    if state.generation == generation && state.connected {
        warn!("Presence channel closed by remote");
        state.connected = false;
        state.outbound = None;
    }
}
