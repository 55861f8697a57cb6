//! In-process relay, token issuer and capture devices.
//!
//! Used by the binary when no external relay is configured and by the tests
//! to drive remote participants and failure modes deterministically.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use super::relay::{
    DeviceCapture, MediaRelay, RelayRoom, RemoteParticipantSnapshot, RemoteTrackInfo,
    RoomConnection, RoomEvent, RoomOptions, TokenIssuer,
};
use super::track::{LocalTrack, TrackKind, TrackSource};
use crate::error::{MeetingError, MeetingResult};

#[derive(Debug, Clone)]
struct PublishedTrack {
    kind: TrackKind,
    source: Option<TrackSource>,
}

struct Member {
    connection_id: u64,
    tracks: BTreeMap<String, PublishedTrack>,
    /// `None` for peers scripted through `LoopbackPeer`.
    events: Option<mpsc::UnboundedSender<RoomEvent>>,
}

impl Member {
    fn snapshot(&self, participant_id: &str) -> RemoteParticipantSnapshot {
        RemoteParticipantSnapshot {
            participant_id: participant_id.to_string(),
            tracks: self
                .tracks
                .iter()
                .map(|(id, track)| RemoteTrackInfo {
                    track_id: id.clone(),
                    kind: track.kind,
                })
                .collect(),
        }
    }
}

#[derive(Default)]
struct LoopbackRoomState {
    members: BTreeMap<String, Member>,
    connects: usize,
}

impl LoopbackRoomState {
    fn broadcast(&self, except: &str, event: &RoomEvent) {
        for (id, member) in &self.members {
            if id == except {
                continue;
            }
            if let Some(tx) = &member.events {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Remove `identity` if it is still on `connection_id` (any connection
    /// when `None`) and tell everyone else.
    fn remove_member(&mut self, identity: &str, connection_id: Option<u64>) -> Option<Member> {
        let current = self.members.get(identity)?.connection_id;
        if connection_id.is_some_and(|id| id != current) {
            return None;
        }
        let member = self.members.remove(identity)?;
        self.broadcast(
            identity,
            &RoomEvent::ParticipantLeft {
                participant_id: identity.to_string(),
            },
        );
        Some(member)
    }

    fn member_mut(&mut self, identity: &str, connection_id: u64) -> MeetingResult<&mut Member> {
        self.members
            .get_mut(identity)
            .filter(|member| member.connection_id == connection_id)
            .ok_or_else(|| MeetingError::RoomConnect("connection closed".to_string()))
    }
}

#[derive(Default)]
struct HubState {
    rooms: HashMap<String, LoopbackRoomState>,
    next_connection: u64,
    token_delay: Option<Duration>,
    connect_delay: Option<Duration>,
    failing_tokens: u32,
    failing_connects: u32,
}

impl HubState {
    fn next_connection_id(&mut self) -> u64 {
        self.next_connection += 1;
        self.next_connection
    }
}

/// Relay hub holding every loopback room.
#[derive(Clone, Default)]
pub struct LoopbackRelay {
    hub: Arc<Mutex<HubState>>,
}

impl LoopbackRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_token_delay(&self, delay: Duration) {
        self.hub.lock().await.token_delay = Some(delay);
    }

    pub async fn set_connect_delay(&self, delay: Duration) {
        self.hub.lock().await.connect_delay = Some(delay);
    }

    /// Make the next `count` token requests fail.
    pub async fn fail_next_tokens(&self, count: u32) {
        self.hub.lock().await.failing_tokens = count;
    }

    /// Make the next `count` room connects fail.
    pub async fn fail_next_connects(&self, count: u32) {
        self.hub.lock().await.failing_connects = count;
    }

    /// Add a scripted remote participant to `room`.
    pub async fn join_remote(&self, room: &str, identity: &str) -> LoopbackPeer {
        let mut hub = self.hub.lock().await;
        let connection_id = hub.next_connection_id();
        let state = hub.rooms.entry(room.to_string()).or_default();
        state.remove_member(identity, None);
        state.broadcast(
            identity,
            &RoomEvent::ParticipantJoined {
                participant_id: identity.to_string(),
                tracks: Vec::new(),
            },
        );
        state.members.insert(
            identity.to_string(),
            Member {
                connection_id,
                tracks: BTreeMap::new(),
                events: None,
            },
        );
        LoopbackPeer {
            relay: self.clone(),
            room: room.to_string(),
            identity: identity.to_string(),
            connection_id,
        }
    }

    /// Cut `identity` off as if the relay had dropped it.
    pub async fn drop_member(&self, room: &str, identity: &str, reason: &str) -> bool {
        let mut hub = self.hub.lock().await;
        let Some(state) = hub.rooms.get_mut(room) else {
            return false;
        };
        let Some(member) = state.remove_member(identity, None) else {
            return false;
        };
        info!("Loopback relay dropped {} from {}: {}", identity, room, reason);
        if let Some(tx) = member.events {
            let _ = tx.send(RoomEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
        true
    }

    pub async fn is_member(&self, room: &str, identity: &str) -> bool {
        self.hub
            .lock()
            .await
            .rooms
            .get(room)
            .is_some_and(|state| state.members.contains_key(identity))
    }

    pub async fn members(&self, room: &str) -> Vec<String> {
        self.hub
            .lock()
            .await
            .rooms
            .get(room)
            .map(|state| state.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Sources of the tracks `identity` currently publishes.
    pub async fn published_sources(&self, room: &str, identity: &str) -> Vec<TrackSource> {
        let hub = self.hub.lock().await;
        hub.rooms
            .get(room)
            .and_then(|state| state.members.get(identity))
            .map(|member| member.tracks.values().filter_map(|t| t.source).collect())
            .unwrap_or_default()
    }

    /// Number of connect attempts made against `room`.
    pub async fn connect_count(&self, room: &str) -> usize {
        self.hub
            .lock()
            .await
            .rooms
            .get(room)
            .map(|state| state.connects)
            .unwrap_or(0)
    }

    async fn publish(
        &self,
        room: &str,
        identity: &str,
        connection_id: u64,
        track_id: &str,
        track: PublishedTrack,
    ) -> MeetingResult<()> {
        let mut hub = self.hub.lock().await;
        let state = hub
            .rooms
            .get_mut(room)
            .ok_or_else(|| MeetingError::RoomConnect("room closed".to_string()))?;
        let kind = track.kind;
        let member = state.member_mut(identity, connection_id)?;
        if member.tracks.insert(track_id.to_string(), track).is_some() {
            return Ok(());
        }
        state.broadcast(
            identity,
            &RoomEvent::TrackSubscribed {
                participant_id: identity.to_string(),
                track: RemoteTrackInfo {
                    track_id: track_id.to_string(),
                    kind,
                },
            },
        );
        Ok(())
    }

    async fn unpublish(
        &self,
        room: &str,
        identity: &str,
        connection_id: u64,
        track_id: &str,
    ) -> MeetingResult<()> {
        let mut hub = self.hub.lock().await;
        let state = hub
            .rooms
            .get_mut(room)
            .ok_or_else(|| MeetingError::RoomConnect("room closed".to_string()))?;
        let member = state.member_mut(identity, connection_id)?;
        if member.tracks.remove(track_id).is_none() {
            return Ok(());
        }
        state.broadcast(
            identity,
            &RoomEvent::TrackUnsubscribed {
                participant_id: identity.to_string(),
                track_id: track_id.to_string(),
            },
        );
        Ok(())
    }

    async fn leave(&self, room: &str, identity: &str, connection_id: u64) -> bool {
        let mut hub = self.hub.lock().await;
        hub.rooms
            .get_mut(room)
            .and_then(|state| state.remove_member(identity, Some(connection_id)))
            .is_some()
    }
}

#[async_trait]
impl MediaRelay for LoopbackRelay {
    async fn connect(
        &self,
        credential: &str,
        options: RoomOptions,
    ) -> MeetingResult<RoomConnection> {
        let delay = {
            let mut hub = self.hub.lock().await;
            hub.rooms.entry(options.room_name.clone()).or_default().connects += 1;
            if hub.failing_connects > 0 {
                hub.failing_connects -= 1;
                return Err(MeetingError::RoomConnect(
                    "loopback relay unavailable".to_string(),
                ));
            }
            hub.connect_delay
        };
        if credential.is_empty() {
            return Err(MeetingError::RoomConnect("missing credential".to_string()));
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut hub = self.hub.lock().await;
        let connection_id = hub.next_connection_id();
        let state = hub.rooms.entry(options.room_name.clone()).or_default();
        state.remove_member(&options.identity, None);

        let participants = state
            .members
            .iter()
            .map(|(id, member)| member.snapshot(id))
            .collect();
        state.broadcast(
            &options.identity,
            &RoomEvent::ParticipantJoined {
                participant_id: options.identity.clone(),
                tracks: Vec::new(),
            },
        );

        let (tx, rx) = mpsc::unbounded_channel();
        state.members.insert(
            options.identity.clone(),
            Member {
                connection_id,
                tracks: BTreeMap::new(),
                events: Some(tx),
            },
        );
        debug!(
            "Loopback relay: {} joined {} (connection {})",
            options.identity, options.room_name, connection_id
        );

        Ok(RoomConnection {
            room: Box::new(LoopbackRoom {
                relay: self.clone(),
                room: options.room_name,
                identity: options.identity,
                connection_id,
            }),
            participants,
            events: rx,
        })
    }
}

struct LoopbackRoom {
    relay: LoopbackRelay,
    room: String,
    identity: String,
    connection_id: u64,
}

#[async_trait]
impl RelayRoom for LoopbackRoom {
    fn local_identity(&self) -> &str {
        &self.identity
    }

    async fn publish_track(&self, track: &LocalTrack) -> MeetingResult<()> {
        self.relay
            .publish(
                &self.room,
                &self.identity,
                self.connection_id,
                track.id(),
                PublishedTrack {
                    kind: track.kind(),
                    source: Some(track.source()),
                },
            )
            .await
    }

    async fn unpublish_track(&self, track_id: &str) -> MeetingResult<()> {
        self.relay
            .unpublish(&self.room, &self.identity, self.connection_id, track_id)
            .await
    }

    async fn disconnect(&self) {
        if self
            .relay
            .leave(&self.room, &self.identity, self.connection_id)
            .await
        {
            debug!("Loopback relay: {} left {}", self.identity, self.room);
        }
    }
}

/// Scripted remote participant.
pub struct LoopbackPeer {
    relay: LoopbackRelay,
    room: String,
    identity: String,
    connection_id: u64,
}

impl LoopbackPeer {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub async fn publish(&self, track_id: &str, kind: TrackKind) {
        let _ = self
            .relay
            .publish(
                &self.room,
                &self.identity,
                self.connection_id,
                track_id,
                PublishedTrack { kind, source: None },
            )
            .await;
    }

    pub async fn unpublish(&self, track_id: &str) {
        let _ = self
            .relay
            .unpublish(&self.room, &self.identity, self.connection_id, track_id)
            .await;
    }

    pub async fn leave(self) {
        self.relay
            .leave(&self.room, &self.identity, self.connection_id)
            .await;
    }
}

/// Issues opaque credentials for the loopback relay.
#[derive(Clone)]
pub struct LoopbackTokenIssuer {
    relay: LoopbackRelay,
}

impl LoopbackTokenIssuer {
    pub fn new(relay: LoopbackRelay) -> Self {
        Self { relay }
    }
}

#[async_trait]
impl TokenIssuer for LoopbackTokenIssuer {
    async fn issue(&self, identity: &str, session_id: &str) -> MeetingResult<String> {
        let delay = {
            let mut hub = self.relay.hub.lock().await;
            if hub.failing_tokens > 0 {
                hub.failing_tokens -= 1;
                return Err(MeetingError::TokenFetch(
                    "token service unavailable".to_string(),
                ));
            }
            hub.token_delay
        };
        if identity.is_empty() {
            return Err(MeetingError::TokenFetch("identity is required".to_string()));
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(format!("loopback:{session_id}:{identity}"))
    }
}

#[derive(Default)]
struct DeviceFlags {
    deny_microphone: AtomicBool,
    deny_camera: AtomicBool,
    deny_display: AtomicBool,
}

/// Capture devices that hand out synthetic tracks and remember every track
/// they produced.
#[derive(Clone, Default)]
pub struct SyntheticDevices {
    flags: Arc<DeviceFlags>,
    acquired: Arc<std::sync::Mutex<Vec<LocalTrack>>>,
}

impl SyntheticDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_microphone(&self, deny: bool) {
        self.flags.deny_microphone.store(deny, Ordering::SeqCst);
    }

    pub fn deny_camera(&self, deny: bool) {
        self.flags.deny_camera.store(deny, Ordering::SeqCst);
    }

    pub fn deny_display(&self, deny: bool) {
        self.flags.deny_display.store(deny, Ordering::SeqCst);
    }

    /// Every track handed out so far, oldest first.
    pub fn acquired(&self) -> Vec<LocalTrack> {
        self.acquired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_of(&self, source: TrackSource) -> Option<LocalTrack> {
        self.acquired()
            .into_iter()
            .rev()
            .find(|track| track.source() == source)
    }

    pub fn live_count(&self) -> usize {
        self.acquired().iter().filter(|t| t.is_live()).count()
    }

    fn produce(&self, source: TrackSource) -> LocalTrack {
        let track = LocalTrack::new(source);
        self.acquired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(track.clone());
        debug!("Synthetic {} track {} acquired", source.as_str(), track.id());
        track
    }
}

#[async_trait]
impl DeviceCapture for SyntheticDevices {
    async fn acquire_microphone(&self) -> MeetingResult<LocalTrack> {
        if self.flags.deny_microphone.load(Ordering::SeqCst) {
            return Err(MeetingError::DeviceAcquisition(
                "microphone permission denied".to_string(),
            ));
        }
        Ok(self.produce(TrackSource::Microphone))
    }

    async fn acquire_camera(&self) -> MeetingResult<LocalTrack> {
        if self.flags.deny_camera.load(Ordering::SeqCst) {
            return Err(MeetingError::DeviceAcquisition(
                "camera permission denied".to_string(),
            ));
        }
        Ok(self.produce(TrackSource::Camera))
    }

    async fn acquire_display(&self) -> MeetingResult<LocalTrack> {
        if self.flags.deny_display.load(Ordering::SeqCst) {
            return Err(MeetingError::ScreenShare(
                "screen capture permission denied".to_string(),
            ));
        }
        Ok(self.produce(TrackSource::Screen))
    }
}
