//! In-process presence hub.
//!
//! Sequences chat, keeps per-session history and fans roster changes out to
//! every connected participant. Backs the binary when no presence endpoint
//! is configured.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::channel::{PresenceEndpoint, PresenceLink, PresenceTransport};
use super::protocol::{ChatMessage, ClientFrame, RosterEntry, ServerFrame};
use crate::error::{MeetingError, MeetingResult};

struct HubMember {
    connection_id: u64,
    entry: RosterEntry,
    tx: mpsc::UnboundedSender<ServerFrame>,
}

#[derive(Default)]
struct HubSession {
    members: BTreeMap<String, HubMember>,
    history: Vec<ChatMessage>,
    next_sequence: u64,
}

impl HubSession {
    fn broadcast(&self, except: Option<&str>, frame: &ServerFrame) {
        for (id, member) in &self.members {
            if except == Some(id.as_str()) {
                continue;
            }
            let _ = member.tx.send(frame.clone());
        }
    }

    fn remove(&mut self, participant_id: &str, connection_id: Option<u64>) -> bool {
        let matches = self
            .members
            .get(participant_id)
            .is_some_and(|m| connection_id.map_or(true, |id| id == m.connection_id));
        if !matches {
            return false;
        }
        self.members.remove(participant_id);
        self.broadcast(
            None,
            &ServerFrame::ParticipantLeft {
                participant_id: participant_id.to_string(),
            },
        );
        true
    }
}

#[derive(Default)]
struct HubState {
    sessions: HashMap<String, HubSession>,
    next_connection: u64,
    failing_opens: u32,
    open_delay: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct MemoryPresenceHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryPresenceHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_next_opens(&self, count: u32) {
        self.state.lock().await.failing_opens = count;
    }

    pub async fn set_open_delay(&self, delay: Duration) {
        self.state.lock().await.open_delay = Some(delay);
    }

    /// Drop a participant's connection from the hub side.
    pub async fn kick(&self, session_id: &str, participant_id: &str) -> bool {
        let mut state = self.state.lock().await;
        state
            .sessions
            .get_mut(session_id)
            .is_some_and(|session| session.remove(participant_id, None))
    }

    pub async fn roster(&self, session_id: &str) -> Vec<RosterEntry> {
        self.state
            .lock()
            .await
            .sessions
            .get(session_id)
            .map(|s| s.members.values().map(|m| m.entry.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn history(&self, session_id: &str) -> Vec<ChatMessage> {
        self.state
            .lock()
            .await
            .sessions
            .get(session_id)
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    async fn handle(&self, endpoint: &PresenceEndpoint, connection_id: u64, frame: ClientFrame) -> bool {
        let mut state = self.state.lock().await;
        let Some(session) = state.sessions.get_mut(&endpoint.session_id) else {
            return false;
        };
        let current = session
            .members
            .get(&endpoint.participant_id)
            .is_some_and(|m| m.connection_id == connection_id);
        if !current {
            return false;
        }

        match frame {
            ClientFrame::Chat { client_id, text } => {
                session.next_sequence += 1;
                let message = ChatMessage {
                    sender_id: endpoint.participant_id.clone(),
                    display_name: endpoint.display_name.clone(),
                    text,
                    sequence: Some(session.next_sequence),
                    timestamp: chrono::Utc::now(),
                    client_id: Some(client_id),
                };
                session.history.push(message.clone());
                session.broadcast(None, &ServerFrame::Chat { message });
                true
            }
            ClientFrame::Status(flags) => {
                if let Some(member) = session.members.get_mut(&endpoint.participant_id) {
                    member.entry.is_muted = flags.is_muted;
                    member.entry.is_camera_off = flags.is_camera_off;
                    member.entry.is_screen_sharing = flags.is_screen_sharing;
                }
                session.broadcast(
                    Some(&endpoint.participant_id),
                    &ServerFrame::ParticipantStatus {
                        participant_id: endpoint.participant_id.clone(),
                        flags,
                    },
                );
                true
            }
            ClientFrame::Leave => {
                session.remove(&endpoint.participant_id, Some(connection_id));
                false
            }
        }
    }
}

#[async_trait]
impl PresenceTransport for MemoryPresenceHub {
    async fn open(&self, endpoint: &PresenceEndpoint) -> MeetingResult<PresenceLink> {
        let delay = {
            let mut state = self.state.lock().await;
            if state.failing_opens > 0 {
                state.failing_opens -= 1;
                return Err(MeetingError::PresenceChannel(
                    "presence hub unavailable".to_string(),
                ));
            }
            state.open_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (client_tx, mut client_rx) = mpsc::unbounded_channel();

        let connection_id = {
            let mut state = self.state.lock().await;
            state.next_connection += 1;
            let connection_id = state.next_connection;
            let session = state
                .sessions
                .entry(endpoint.session_id.clone())
                .or_default();
            session.remove(&endpoint.participant_id, None);

            let entry = RosterEntry::new(
                &endpoint.participant_id,
                &endpoint.display_name,
                endpoint.is_host,
            );
            session.broadcast(
                None,
                &ServerFrame::ParticipantJoined {
                    participant: entry.clone(),
                },
            );
            session.members.insert(
                endpoint.participant_id.clone(),
                HubMember {
                    connection_id,
                    entry,
                    tx: server_tx.clone(),
                },
            );

            let participants = session.members.values().map(|m| m.entry.clone()).collect();
            let _ = server_tx.send(ServerFrame::Roster { participants });
            let _ = server_tx.send(ServerFrame::History {
                messages: session.history.clone(),
            });
            connection_id
        };
        debug!(
            "Presence hub: {} joined {}",
            endpoint.participant_id, endpoint.session_id
        );

        let hub = self.clone();
        let endpoint = endpoint.clone();
        tokio::spawn(async move {
            while let Some(frame) = client_rx.recv().await {
                if !hub.handle(&endpoint, connection_id, frame).await {
                    return;
                }
            }
            let mut state = hub.state.lock().await;
            if let Some(session) = state.sessions.get_mut(&endpoint.session_id) {
                session.remove(&endpoint.participant_id, Some(connection_id));
            }
        });

        Ok(PresenceLink {
            outbound: client_tx,
            inbound: server_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::DeviceState;
    use crate::presence::PresenceChannel;
    use tokio_util::sync::CancellationToken;

    fn endpoint(id: &str, name: &str) -> PresenceEndpoint {
        PresenceEndpoint {
            session_id: "meet-42".to_string(),
            participant_id: id.to_string(),
            display_name: name.to_string(),
            is_host: id == "alice",
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_roster_includes_everyone() {
        let hub = MemoryPresenceHub::new();
        let alice = PresenceChannel::new(Arc::new(hub.clone()));
        let bob = PresenceChannel::new(Arc::new(hub.clone()));
        let cancel = CancellationToken::new();

        alice.connect(endpoint("alice", "Alice"), &cancel).await.unwrap();
        let snapshot = bob.connect(endpoint("bob", "Bob"), &cancel).await.unwrap();
        assert_eq!(snapshot.roster.len(), 2);

        settle().await;
        assert_eq!(alice.roster().await.len(), 2);

        bob.disconnect().await;
        settle().await;
        assert_eq!(alice.roster().await.len(), 1);
    }

    #[tokio::test]
    async fn test_chat_is_sequenced_for_all() {
        let hub = MemoryPresenceHub::new();
        let alice = PresenceChannel::new(Arc::new(hub.clone()));
        let bob = PresenceChannel::new(Arc::new(hub.clone()));
        let cancel = CancellationToken::new();
        alice.connect(endpoint("alice", "Alice"), &cancel).await.unwrap();
        bob.connect(endpoint("bob", "Bob"), &cancel).await.unwrap();

        assert!(alice.send_message("hello").await.unwrap());
        assert!(bob.send_message("hi alice").await.unwrap());
        settle().await;

        let seen_by_alice = alice.messages().await;
        let seen_by_bob = bob.messages().await;
        assert_eq!(seen_by_alice, seen_by_bob);
        assert_eq!(seen_by_alice.len(), 2);
        assert_eq!(seen_by_alice[0].sequence, Some(1));
        assert_eq!(seen_by_alice[1].display_name, "Bob");
    }

    #[tokio::test]
    async fn test_blank_messages_are_ignored() {
        let hub = MemoryPresenceHub::new();
        let alice = PresenceChannel::new(Arc::new(hub.clone()));
        alice
            .connect(endpoint("alice", "Alice"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!alice.send_message("").await.unwrap());
        assert!(!alice.send_message("   ").await.unwrap());
        settle().await;
        assert!(alice.messages().await.is_empty());
        assert!(hub.history("meet-42").await.is_empty());
    }

    #[tokio::test]
    async fn test_late_joiner_receives_history() {
        let hub = MemoryPresenceHub::new();
        let alice = PresenceChannel::new(Arc::new(hub.clone()));
        let cancel = CancellationToken::new();
        alice.connect(endpoint("alice", "Alice"), &cancel).await.unwrap();
        alice.send_message("welcome").await.unwrap();
        settle().await;

        let bob = PresenceChannel::new(Arc::new(hub.clone()));
        bob.connect(endpoint("bob", "Bob"), &cancel).await.unwrap();
        settle().await;
        assert_eq!(bob.messages().await[0].text, "welcome");
    }

    #[tokio::test]
    async fn test_status_reaches_other_participants() {
        let hub = MemoryPresenceHub::new();
        let alice = PresenceChannel::new(Arc::new(hub.clone()));
        let bob = PresenceChannel::new(Arc::new(hub.clone()));
        let cancel = CancellationToken::new();
        alice.connect(endpoint("alice", "Alice"), &cancel).await.unwrap();
        bob.connect(endpoint("bob", "Bob"), &cancel).await.unwrap();

        alice
            .update_status(DeviceState {
                is_muted: true,
                ..DeviceState::default()
            })
            .await
            .unwrap();
        settle().await;

        let roster = bob.roster().await;
        let entry = roster.iter().find(|e| e.participant_id == "alice").unwrap();
        assert!(entry.is_muted);
        assert!(entry.is_host);
    }

    #[tokio::test]
    async fn test_kick_marks_channel_disconnected() {
        let hub = MemoryPresenceHub::new();
        let alice = PresenceChannel::new(Arc::new(hub.clone()));
        alice
            .connect(endpoint("alice", "Alice"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(hub.kick("meet-42", "alice").await);
        settle().await;
        assert!(!alice.is_connected().await);
        assert!(matches!(
            alice.send_message("anyone?").await,
            Err(MeetingError::PresenceChannel(_))
        ));
    }

    #[tokio::test]
    async fn test_open_failure_surfaces_presence_error() {
        let hub = MemoryPresenceHub::new();
        hub.fail_next_opens(1).await;
        let alice = PresenceChannel::new(Arc::new(hub));
        assert!(matches!(
            alice
                .connect(endpoint("alice", "Alice"), &CancellationToken::new())
                .await,
            Err(MeetingError::PresenceChannel(_))
        ));
        assert!(!alice.is_connected().await);
    }
}
