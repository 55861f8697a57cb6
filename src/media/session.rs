//! Media session manager.
//!
//! Owns the relay room connection, the local capture handles and the
//! remote-track aggregation for one meeting. Lifecycle:
//!
//! connect → (events | toggles)* → [relay drop → reconnect]* → teardown
//!
//! Every connect step is guarded by a `CancellationToken`. A connect that is
//! cancelled never writes state, and a room or device that resolves after
//! cancellation is released immediately.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::aggregation::{RemoteMedia, RemoteMediaMap};
use super::reconnect::ReconnectPolicy;
use super::relay::{
    DeviceCapture, MediaRelay, RelayRoom, RemoteParticipantSnapshot, RoomConnection, RoomEvent,
    RoomOptions, TokenIssuer,
};
use super::track::{LocalTrack, TrackSource};
use crate::cancel::run_guarded;
use crate::error::{MeetingError, MeetingResult};

/// Connection status of the relay room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Reconnecting { attempt: u32, backoff_ms: u64 },
    Failed { reason: String },
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Derived view of the local participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocalMediaState {
    pub audio_track: Option<String>,
    pub camera_track: Option<String>,
    pub screen_track: Option<String>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub screen_sharing: bool,
    pub published_video: Option<TrackSource>,
}

impl LocalMediaState {
    pub fn camera_published(&self) -> bool {
        self.published_video == Some(TrackSource::Camera)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaSnapshot {
    pub status: ConnectionStatus,
    pub connected: bool,
    pub participant_count: usize,
    pub local: LocalMediaState,
    pub remote_participants: Vec<String>,
    pub remote_media: Vec<RemoteMedia>,
}

#[derive(Default)]
struct LocalTracks {
    audio: Option<LocalTrack>,
    camera: Option<LocalTrack>,
    screen: Option<LocalTrack>,
    published_video: Option<TrackSource>,
}

impl LocalTracks {
    fn published_video_track(&self) -> Option<&LocalTrack> {
        match self.published_video {
            Some(TrackSource::Camera) => self.camera.as_ref(),
            Some(TrackSource::Screen) => self.screen.as_ref(),
            _ => None,
        }
    }

    /// Stop and release every handle. Returns how many were still live.
    fn stop_all(&mut self) -> usize {
        let stopped = [self.audio.take(), self.camera.take(), self.screen.take()]
            .into_iter()
            .flatten()
            .filter(|track| track.stop())
            .count();
        self.published_video = None;
        stopped
    }

    fn view(&self) -> LocalMediaState {
        LocalMediaState {
            audio_track: self.audio.as_ref().map(|t| t.id().to_string()),
            camera_track: self.camera.as_ref().map(|t| t.id().to_string()),
            screen_track: self.screen.as_ref().map(|t| t.id().to_string()),
            audio_enabled: self.audio.as_ref().is_some_and(LocalTrack::is_enabled),
            video_enabled: self.camera.as_ref().is_some_and(LocalTrack::is_enabled),
            screen_sharing: self.screen.is_some(),
            published_video: self.published_video,
        }
    }
}

#[derive(Debug, Clone)]
struct SessionKey {
    session_id: String,
    identity: String,
}

struct MediaState {
    session: Option<SessionKey>,
    room: Option<Arc<dyn RelayRoom>>,
    local: LocalTracks,
    participants: BTreeSet<String>,
    media: RemoteMediaMap,
    /// Bumped on every (re)connect and teardown; stale tasks compare against it.
    generation: u64,
    session_cancel: CancellationToken,
    event_task: Option<JoinHandle<()>>,
}

impl Default for MediaState {
    fn default() -> Self {
        Self {
            session: None,
            room: None,
            local: LocalTracks::default(),
            participants: BTreeSet::new(),
            media: RemoteMediaMap::new(),
            generation: 0,
            session_cancel: CancellationToken::new(),
            event_task: None,
        }
    }
}

impl MediaState {
    fn apply_snapshot(&mut self, participants: Vec<RemoteParticipantSnapshot>) {
        self.participants.clear();
        self.media.clear();
        for participant in participants {
            for track in &participant.tracks {
                self.media.attach(&participant.participant_id, track);
            }
            self.participants.insert(participant.participant_id);
        }
    }

    fn apply_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::ParticipantJoined {
                participant_id,
                tracks,
            } => {
                info!(
                    "Participant {} joined with {} track(s)",
                    participant_id,
                    tracks.len()
                );
                for track in &tracks {
                    self.media.attach(&participant_id, track);
                }
                self.participants.insert(participant_id);
            }
            RoomEvent::ParticipantLeft { participant_id } => {
                let removed = self.media.remove_participant(&participant_id);
                self.participants.remove(&participant_id);
                info!(
                    "Participant {} left ({} track(s) released)",
                    participant_id, removed
                );
            }
            RoomEvent::TrackSubscribed {
                participant_id,
                track,
            } => {
                if self.media.attach(&participant_id, &track) {
                    debug!(
                        "Subscribed {} track {} from {}",
                        track.kind.as_str(),
                        track.track_id,
                        participant_id
                    );
                }
                self.participants.insert(participant_id);
            }
            RoomEvent::TrackUnsubscribed {
                participant_id,
                track_id,
            } => {
                if self.media.detach(&participant_id, &track_id) {
                    debug!("Unsubscribed track {} from {}", track_id, participant_id);
                }
            }
            RoomEvent::Disconnected { .. } => {}
        }
    }
}

struct MediaInner {
    tokens: Arc<dyn TokenIssuer>,
    relay: Arc<dyn MediaRelay>,
    devices: Arc<dyn DeviceCapture>,
    policy: ReconnectPolicy,
    state: Mutex<MediaState>,
    status: watch::Sender<ConnectionStatus>,
    local: watch::Sender<LocalMediaState>,
}

/// Handle to the media session. Cheap to clone; the session is torn down when
/// the last handle is dropped.
#[derive(Clone)]
pub struct MediaSessionManager {
    inner: Arc<MediaInner>,
}

impl MediaSessionManager {
    pub fn new(
        tokens: Arc<dyn TokenIssuer>,
        relay: Arc<dyn MediaRelay>,
        devices: Arc<dyn DeviceCapture>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (local, _) = watch::channel(LocalMediaState::default());
        Self {
            inner: Arc::new(MediaInner {
                tokens,
                relay,
                devices,
                policy,
                state: Mutex::new(MediaState::default()),
                status,
                local,
            }),
        }
    }

    /// Join the relay room for `session_id` as `identity`, capture and
    /// publish microphone and camera.
    pub async fn connect(
        &self,
        session_id: &str,
        identity: &str,
        cancel: &CancellationToken,
    ) -> MeetingResult<MediaSnapshot> {
        {
            let state = self.inner.state.lock().await;
            if state.session.is_some() {
                return Err(MeetingError::InvalidState(
                    "media session already connected".to_string(),
                ));
            }
        }

        info!("Connecting media session {} as {}", session_id, identity);
        let key = SessionKey {
            session_id: session_id.to_string(),
            identity: identity.to_string(),
        };

        let connection = self.inner.open_room(&key, cancel).await?;
        let RoomConnection {
            room,
            participants,
            events,
        } = connection;
        let room: Arc<dyn RelayRoom> = Arc::from(room);

        let local = match self.inner.capture_and_publish(&room, cancel).await {
            Ok(local) => local,
            Err(e) => {
                warn!("Media setup failed, leaving room: {}", e);
                room.disconnect().await;
                return Err(e);
            }
        };

        let mut state = self.inner.state.lock().await;
        if cancel.is_cancelled() || state.session.is_some() {
            drop(state);
            let mut local = local;
            local.stop_all();
            room.disconnect().await;
            debug!("Connect resolved after cancellation; released room and devices");
            return Err(MeetingError::Cancelled);
        }

        state.generation += 1;
        state.session = Some(key);
        state.room = Some(Arc::clone(&room));
        state.local = local;
        state.apply_snapshot(participants);
        state.session_cancel = CancellationToken::new();

        let task = tokio::spawn(run_events(
            Arc::downgrade(&self.inner),
            events,
            state.generation,
            state.session_cancel.clone(),
        ));
        state.event_task = Some(task);
        self.inner.status.send_replace(ConnectionStatus::Connected);
        self.inner.publish_local(&state);

        info!(
            "Media session connected ({} remote participant(s))",
            state.participants.len()
        );
        Ok(self.inner.snapshot_locked(&state))
    }

    pub async fn toggle_microphone(&self) -> MeetingResult<bool> {
        let state = self.inner.state.lock().await;
        let track = state.local.audio.as_ref().ok_or(MeetingError::NotConnected)?;
        let enabled = track.toggle_enabled();
        self.inner.publish_local(&state);
        info!("Microphone {}", if enabled { "unmuted" } else { "muted" });
        Ok(enabled)
    }

    pub async fn toggle_camera(&self) -> MeetingResult<bool> {
        let state = self.inner.state.lock().await;
        let track = state.local.camera.as_ref().ok_or(MeetingError::NotConnected)?;
        let enabled = track.toggle_enabled();
        self.inner.publish_local(&state);
        info!("Camera {}", if enabled { "on" } else { "off" });
        Ok(enabled)
    }

    /// Start or stop screen sharing. Returns whether sharing is now active.
    pub async fn toggle_screen_share(&self) -> MeetingResult<bool> {
        let sharing = {
            let state = self.inner.state.lock().await;
            if state.session.is_none() {
                return Err(MeetingError::NotConnected);
            }
            state.local.screen.is_some()
        };

        if sharing {
            self.stop_screen_share(None).await?;
            Ok(false)
        } else {
            self.start_screen_share().await?;
            Ok(true)
        }
    }

    async fn start_screen_share(&self) -> MeetingResult<()> {
        let generation = self.inner.state.lock().await.generation;

        // May suspend on a permission prompt; the lock is not held meanwhile.
        let screen = self.inner.devices.acquire_display().await.map_err(|e| match e {
            MeetingError::ScreenShare(msg) => MeetingError::ScreenShare(msg),
            other => MeetingError::ScreenShare(other.to_string()),
        })?;

        let mut state = self.inner.state.lock().await;
        if state.generation != generation || state.session.is_none() {
            screen.stop();
            return Err(MeetingError::NotConnected);
        }
        if state.local.screen.is_some() {
            screen.stop();
            return Err(MeetingError::InvalidState(
                "screen share already active".to_string(),
            ));
        }
        let room = state.room.clone().ok_or_else(|| {
            screen.stop();
            MeetingError::ScreenShare("media room is reconnecting".to_string())
        })?;

        if state.local.published_video == Some(TrackSource::Camera) {
            if let Some(camera) = state.local.camera.clone() {
                if let Err(e) = room.unpublish_track(camera.id()).await {
                    screen.stop();
                    return Err(MeetingError::ScreenShare(format!(
                        "failed to unpublish camera: {e}"
                    )));
                }
            }
            state.local.published_video = None;
        }

        if let Err(e) = room.publish_track(&screen).await {
            screen.stop();
            if let Some(camera) = state.local.camera.clone() {
                match room.publish_track(&camera).await {
                    Ok(()) => state.local.published_video = Some(TrackSource::Camera),
                    Err(err) => warn!("Failed to restore camera after screen share error: {}", err),
                }
            }
            self.inner.publish_local(&state);
            return Err(MeetingError::ScreenShare(e.to_string()));
        }

        state.local.screen = Some(screen.clone());
        state.local.published_video = Some(TrackSource::Screen);
        self.inner.publish_local(&state);
        drop(state);

        info!("Screen share started ({})", screen.id());
        self.watch_screen(screen);
        Ok(())
    }

    /// Stop sharing. With `expected`, only stops if that track is still the
    /// active screen track. Returns whether anything was stopped.
    async fn stop_screen_share(&self, expected: Option<&LocalTrack>) -> MeetingResult<bool> {
        let mut state = self.inner.state.lock().await;
        let Some(screen) = state.local.screen.clone() else {
            return Ok(false);
        };
        if expected.is_some_and(|track| !track.same_track(&screen)) {
            return Ok(false);
        }

        let room = state.room.clone();
        if let Some(room) = &room {
            if let Err(e) = room.unpublish_track(screen.id()).await {
                warn!("Failed to unpublish screen track: {}", e);
            }
        }
        screen.stop();
        state.local.screen = None;
        state.local.published_video = None;

        let mut restored = Ok(());
        if let Some(camera) = state.local.camera.clone() {
            restored = match &room {
                Some(room) => room.publish_track(&camera).await,
                None => Ok(()),
            };
            if restored.is_ok() {
                state.local.published_video = Some(TrackSource::Camera);
            }
        }
        self.inner.publish_local(&state);

        restored.map_err(|e| {
            MeetingError::ScreenShare(format!("failed to republish camera: {e}"))
        })?;
        info!("Screen share stopped, camera restored");
        Ok(true)
    }

    fn watch_screen(&self, screen: LocalTrack) {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            screen.ended().await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let manager = MediaSessionManager { inner };
            match manager.stop_screen_share(Some(&screen)).await {
                Ok(true) => info!("Screen capture ended externally"),
                Ok(false) => {}
                Err(e) => warn!("Failed to restore camera after screen capture ended: {}", e),
            }
        });
    }

    /// Stop every local track and leave the room. Safe to call repeatedly.
    /// Returns the number of tracks that were still live.
    pub async fn teardown(&self) -> usize {
        let (room, task, stopped) = {
            let mut state = self.inner.state.lock().await;
            state.generation += 1;
            state.session_cancel.cancel();
            let stopped = state.local.stop_all();
            state.participants.clear();
            state.media.clear();
            state.session = None;
            self.inner.publish_local(&state);
            (state.room.take(), state.event_task.take(), stopped)
        };

        if let Some(task) = task {
            task.abort();
        }
        if let Some(room) = room {
            room.disconnect().await;
        }
        self.inner.status.send_replace(ConnectionStatus::Disconnected);

        info!("Media session torn down ({} track(s) stopped)", stopped);
        stopped
    }

    pub async fn snapshot(&self) -> MediaSnapshot {
        let state = self.inner.state.lock().await;
        self.inner.snapshot_locked(&state)
    }

    pub async fn local_state(&self) -> LocalMediaState {
        self.inner.state.lock().await.local.view()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Receiver that observes every change to the local participant's media.
    pub fn subscribe_local(&self) -> watch::Receiver<LocalMediaState> {
        self.inner.local.subscribe()
    }
}

impl MediaInner {
    fn publish_local(&self, state: &MediaState) {
        self.local.send_replace(state.local.view());
    }

    fn snapshot_locked(&self, state: &MediaState) -> MediaSnapshot {
        let status = self.status.borrow().clone();
        MediaSnapshot {
            connected: status.is_connected(),
            status,
            participant_count: state.participants.len() + usize::from(state.session.is_some()),
            local: state.local.view(),
            remote_participants: state.participants.iter().cloned().collect(),
            remote_media: state.media.all(),
        }
    }

    /// Fetch a credential and open the room, both cancellation-guarded.
    async fn open_room(
        &self,
        key: &SessionKey,
        cancel: &CancellationToken,
    ) -> MeetingResult<RoomConnection> {
        let tokens = Arc::clone(&self.tokens);
        let identity = key.identity.clone();
        let session_id = key.session_id.clone();
        let credential = run_guarded(
            cancel,
            async move { tokens.issue(&identity, &session_id).await },
            |_credential| async {},
        )
        .await?;

        let relay = Arc::clone(&self.relay);
        let options = RoomOptions {
            room_name: key.session_id.clone(),
            identity: key.identity.clone(),
            audio: true,
            video: true,
        };
        run_guarded(
            cancel,
            async move { relay.connect(&credential, options).await },
            |connection: RoomConnection| async move {
                info!("Room connect resolved after cancellation; disconnecting");
                connection.room.disconnect().await;
            },
        )
        .await
    }

    async fn capture_and_publish(
        &self,
        room: &Arc<dyn RelayRoom>,
        cancel: &CancellationToken,
    ) -> MeetingResult<LocalTracks> {
        let mut local = LocalTracks::default();
        if let Err(e) = self.capture_into(&mut local, room, cancel).await {
            local.stop_all();
            return Err(e);
        }
        Ok(local)
    }

    async fn capture_into(
        &self,
        local: &mut LocalTracks,
        room: &Arc<dyn RelayRoom>,
        cancel: &CancellationToken,
    ) -> MeetingResult<()> {
        let devices = Arc::clone(&self.devices);
        let audio = run_guarded(
            cancel,
            async move { devices.acquire_microphone().await },
            |track: LocalTrack| async move {
                track.stop();
            },
        )
        .await?;
        local.audio = Some(audio.clone());

        let devices = Arc::clone(&self.devices);
        let camera = run_guarded(
            cancel,
            async move { devices.acquire_camera().await },
            |track: LocalTrack| async move {
                track.stop();
            },
        )
        .await?;
        local.camera = Some(camera.clone());

        for track in [&audio, &camera] {
            room.publish_track(track).await.map_err(|e| match e {
                MeetingError::RoomConnect(msg) => MeetingError::RoomConnect(msg),
                other => MeetingError::RoomConnect(format!(
                    "failed to publish {} track: {other}",
                    track.source().as_str()
                )),
            })?;
        }
        local.published_video = Some(TrackSource::Camera);
        Ok(())
    }

    /// Open a fresh room for the current session and republish local media.
    /// Returns `None` when the session was left or replaced meanwhile.
    async fn reestablish(
        &self,
        generation: u64,
        session_cancel: &CancellationToken,
    ) -> MeetingResult<Option<(mpsc::UnboundedReceiver<RoomEvent>, u64)>> {
        let key = {
            let state = self.state.lock().await;
            match (&state.session, state.generation == generation) {
                (Some(key), true) => key.clone(),
                _ => return Ok(None),
            }
        };

        let RoomConnection {
            room,
            participants,
            events,
        } = self.open_room(&key, session_cancel).await?;
        let room: Arc<dyn RelayRoom> = Arc::from(room);

        let mut state = self.state.lock().await;
        if state.generation != generation || session_cancel.is_cancelled() {
            drop(state);
            room.disconnect().await;
            return Ok(None);
        }

        let republish: Vec<LocalTrack> = state
            .local
            .audio
            .iter()
            .chain(state.local.published_video_track())
            .cloned()
            .collect();
        for track in &republish {
            if let Err(e) = room.publish_track(track).await {
                room.disconnect().await;
                return Err(e);
            }
        }

        state.generation += 1;
        state.room = Some(room);
        state.apply_snapshot(participants);
        self.status.send_replace(ConnectionStatus::Connected);
        Ok(Some((events, state.generation)))
    }
}

impl Drop for MediaInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.session_cancel.cancel();
        let stopped = state.local.stop_all();
        if let Some(task) = state.event_task.take() {
            task.abort();
        }
        if let Some(room) = state.room.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { room.disconnect().await });
                }
                Err(_) => warn!("No runtime to disconnect media room on drop"),
            }
        }
        if stopped > 0 {
            debug!("Media session dropped; stopped {} track(s)", stopped);
        }
    }
}

async fn run_events(
    inner: Weak<MediaInner>,
    mut events: mpsc::UnboundedReceiver<RoomEvent>,
    mut generation: u64,
    session_cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = session_cancel.cancelled() => return,
            event = events.recv() => event,
        };

        let reason = match event {
            Some(RoomEvent::Disconnected { reason }) => reason,
            None => "relay event stream closed".to_string(),
            Some(event) => {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                let mut state = inner.state.lock().await;
                if state.generation != generation {
                    return;
                }
                state.apply_event(event);
                continue;
            }
        };

        match reconnect(&inner, generation, &reason, &session_cancel).await {
            Some((next_events, next_generation)) => {
                events = next_events;
                generation = next_generation;
            }
            None => return,
        }
    }
}

async fn reconnect(
    weak: &Weak<MediaInner>,
    generation: u64,
    reason: &str,
    session_cancel: &CancellationToken,
) -> Option<(mpsc::UnboundedReceiver<RoomEvent>, u64)> {
    let policy = {
        let inner = weak.upgrade()?;
        let stale_room = {
            let mut state = inner.state.lock().await;
            if state.generation != generation {
                return None;
            }
            state.participants.clear();
            state.media.clear();
            state.room.take()
        };
        warn!("Media relay disconnected: {}", reason);
        if let Some(room) = stale_room {
            room.disconnect().await;
        }
        inner.policy
    };

    let mut last_error = reason.to_string();
    for attempt in 1..=policy.max_attempts {
        let backoff = policy.backoff_for(attempt);
        {
            let inner = weak.upgrade()?;
            inner.status.send_replace(ConnectionStatus::Reconnecting {
                attempt,
                backoff_ms: u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
            });
        }
        info!(
            "Reconnecting to media relay (attempt {}/{}) in {:?}",
            attempt, policy.max_attempts, backoff
        );

        tokio::select! {
            biased;
            _ = session_cancel.cancelled() => return None,
            _ = tokio::time::sleep(backoff) => {}
        }

        let inner = weak.upgrade()?;
        match inner.reestablish(generation, session_cancel).await {
            Ok(Some(next)) => {
                info!("Media relay reconnected on attempt {}", attempt);
                return Some(next);
            }
            Ok(None) | Err(MeetingError::Cancelled) => return None,
            Err(e) => {
                warn!("Reconnect attempt {} failed: {}", attempt, e);
                last_error = e.to_string();
            }
        }
    }

    let inner = weak.upgrade()?;
    let state = inner.state.lock().await;
    if state.generation == generation {
        error!("Giving up on media relay after {} attempt(s)", policy.max_attempts);
        inner
            .status
            .send_replace(ConnectionStatus::Failed { reason: last_error });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::loopback::{LoopbackRelay, LoopbackTokenIssuer, SyntheticDevices};
    use crate::media::relay::RemoteTrackInfo;
    use crate::media::track::{TrackKind, TrackState};
    use std::time::Duration;

    struct Fixture {
        relay: LoopbackRelay,
        devices: SyntheticDevices,
        manager: MediaSessionManager,
    }

    fn fixture_with_policy(policy: ReconnectPolicy) -> Fixture {
        let relay = LoopbackRelay::new();
        let devices = SyntheticDevices::new();
        let manager = MediaSessionManager::new(
            Arc::new(LoopbackTokenIssuer::new(relay.clone())),
            Arc::new(relay.clone()),
            Arc::new(devices.clone()),
            policy,
        );
        Fixture {
            relay,
            devices,
            manager,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_policy(ReconnectPolicy::disabled())
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_connect_publishes_audio_and_camera() {
        let f = fixture();
        let snapshot = f
            .manager
            .connect("meet-42", "alice", &CancellationToken::new())
            .await
            .unwrap();

        assert!(snapshot.connected);
        assert_eq!(snapshot.participant_count, 1);
        assert!(snapshot.local.audio_enabled);
        assert!(snapshot.local.video_enabled);
        assert!(snapshot.local.camera_published());
        assert_eq!(f.relay.published_sources("meet-42", "alice").await.len(), 2);
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let f = fixture();
        let cancel = CancellationToken::new();
        f.manager.connect("meet-42", "alice", &cancel).await.unwrap();
        assert!(matches!(
            f.manager.connect("meet-42", "alice", &cancel).await,
            Err(MeetingError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_existing_participants_are_aggregated() {
        let f = fixture();
        let bob = f.relay.join_remote("meet-42", "bob").await;
        bob.publish("bob-audio", TrackKind::Audio).await;
        bob.publish("bob-video", TrackKind::Video).await;

        let snapshot = f
            .manager
            .connect("meet-42", "alice", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(snapshot.participant_count, 2);
        assert_eq!(snapshot.remote_media.len(), 1);
        assert_eq!(snapshot.remote_media[0].track_count(), 2);
    }

    #[tokio::test]
    async fn test_token_failure_leaves_session_unjoined() {
        let f = fixture();
        f.relay.fail_next_tokens(1).await;
        let err = f
            .manager
            .connect("meet-42", "alice", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MeetingError::TokenFetch(_)));
        assert!(!f.manager.snapshot().await.connected);
        assert!(f.devices.acquired().is_empty());
    }

    #[tokio::test]
    async fn test_device_denial_disconnects_room() {
        let f = fixture();
        f.devices.deny_camera(true);
        let err = f
            .manager
            .connect("meet-42", "alice", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MeetingError::DeviceAcquisition(_)));
        assert!(f.devices.acquired().iter().all(|t| !t.is_live()));
        assert!(!f.relay.is_member("meet-42", "alice").await);
    }

    #[tokio::test]
    async fn test_toggle_microphone_pairs() {
        let f = fixture();
        f.manager
            .connect("meet-42", "alice", &CancellationToken::new())
            .await
            .unwrap();

        for n in 1..=6 {
            f.manager.toggle_microphone().await.unwrap();
            let local = f.manager.local_state().await;
            assert_eq!(local.audio_enabled, n % 2 == 0);
        }
        // Toggling never unpublishes.
        assert_eq!(f.relay.published_sources("meet-42", "alice").await.len(), 2);
    }

    #[tokio::test]
    async fn test_toggle_before_connect_fails() {
        let f = fixture();
        assert_eq!(
            f.manager.toggle_camera().await,
            Err(MeetingError::NotConnected)
        );
        assert_eq!(
            f.manager.toggle_screen_share().await,
            Err(MeetingError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_screen_share_swaps_video_publication() {
        let f = fixture();
        f.manager
            .connect("meet-42", "alice", &CancellationToken::new())
            .await
            .unwrap();

        assert!(f.manager.toggle_screen_share().await.unwrap());
        let local = f.manager.local_state().await;
        assert!(local.screen_sharing);
        assert!(!local.camera_published());
        assert_eq!(local.published_video, Some(TrackSource::Screen));

        let sources = f.relay.published_sources("meet-42", "alice").await;
        assert!(sources.contains(&TrackSource::Screen));
        assert!(!sources.contains(&TrackSource::Camera));

        assert!(!f.manager.toggle_screen_share().await.unwrap());
        let local = f.manager.local_state().await;
        assert!(!local.screen_sharing);
        assert!(local.camera_published());
        let screen = f.devices.last_of(TrackSource::Screen).unwrap();
        assert_eq!(screen.state(), TrackState::Ended);
        let camera = f.devices.last_of(TrackSource::Camera).unwrap();
        assert!(camera.is_live());
    }

    #[tokio::test]
    async fn test_screen_share_denied_keeps_camera() {
        let f = fixture();
        f.manager
            .connect("meet-42", "alice", &CancellationToken::new())
            .await
            .unwrap();
        f.devices.deny_display(true);

        let err = f.manager.toggle_screen_share().await.unwrap_err();
        assert!(matches!(err, MeetingError::ScreenShare(_)));
        let local = f.manager.local_state().await;
        assert!(!local.screen_sharing);
        assert!(local.camera_published());
    }

    #[tokio::test]
    async fn test_screen_ended_externally_restores_camera() {
        let f = fixture();
        f.manager
            .connect("meet-42", "alice", &CancellationToken::new())
            .await
            .unwrap();
        f.manager.toggle_screen_share().await.unwrap();

        f.devices.last_of(TrackSource::Screen).unwrap().stop();
        settle().await;

        let local = f.manager.local_state().await;
        assert!(!local.screen_sharing);
        assert!(local.camera_published());
    }

    #[tokio::test]
    async fn test_remote_tracks_follow_events() {
        let f = fixture();
        f.manager
            .connect("meet-42", "alice", &CancellationToken::new())
            .await
            .unwrap();

        let bob = f.relay.join_remote("meet-42", "bob").await;
        bob.publish("bob-audio", TrackKind::Audio).await;
        settle().await;
        assert_eq!(f.manager.snapshot().await.remote_media.len(), 1);

        bob.unpublish("bob-audio").await;
        settle().await;
        let snapshot = f.manager.snapshot().await;
        assert!(snapshot.remote_media.is_empty());
        assert_eq!(snapshot.participant_count, 2);
    }

    #[tokio::test]
    async fn test_teardown_stops_every_track() {
        let f = fixture();
        f.manager
            .connect("meet-42", "alice", &CancellationToken::new())
            .await
            .unwrap();
        f.manager.toggle_screen_share().await.unwrap();

        assert_eq!(f.manager.teardown().await, 3);
        assert!(f.devices.acquired().iter().all(|t| !t.is_live()));
        assert!(!f.relay.is_member("meet-42", "alice").await);
        assert_eq!(f.manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(f.manager.teardown().await, 0);
    }

    #[tokio::test]
    async fn test_drop_releases_tracks() {
        let f = fixture();
        f.manager
            .connect("meet-42", "alice", &CancellationToken::new())
            .await
            .unwrap();
        let Fixture {
            relay,
            devices,
            manager,
        } = f;
        drop(manager);
        settle().await;

        assert!(devices.acquired().iter().all(|t| !t.is_live()));
        assert!(!relay.is_member("meet-42", "alice").await);
    }

    #[tokio::test]
    async fn test_cancel_before_token_writes_nothing() {
        let f = fixture();
        f.relay.set_token_delay(Duration::from_millis(200)).await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = f.manager.connect("meet-42", "alice", &cancel).await.unwrap_err();
        assert_eq!(err, MeetingError::Cancelled);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let snapshot = f.manager.snapshot().await;
        assert!(!snapshot.connected);
        assert_eq!(snapshot.participant_count, 0);
        assert!(f.devices.acquired().is_empty());
        assert!(!f.relay.is_member("meet-42", "alice").await);
    }

    #[tokio::test]
    async fn test_cancel_during_room_connect_tears_down_late_room() {
        let f = fixture();
        f.relay.set_connect_delay(Duration::from_millis(100)).await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        assert_eq!(
            f.manager.connect("meet-42", "alice", &cancel).await.unwrap_err(),
            MeetingError::Cancelled
        );

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(f.relay.connect_count("meet-42").await, 1);
        assert!(!f.relay.is_member("meet-42", "alice").await);
        assert!(!f.manager.snapshot().await.connected);
    }

    #[tokio::test]
    async fn test_relay_disconnect_reconnects_and_republishes() {
        let f = fixture_with_policy(ReconnectPolicy {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            max_attempts: 3,
        });
        let bob = f.relay.join_remote("meet-42", "bob").await;
        bob.publish("bob-audio", TrackKind::Audio).await;

        f.manager
            .connect("meet-42", "alice", &CancellationToken::new())
            .await
            .unwrap();
        let mut status = f.manager.subscribe_status();

        f.relay.drop_member("meet-42", "alice", "network lost").await;
        status
            .wait_for(|s| matches!(s, ConnectionStatus::Reconnecting { .. }))
            .await
            .unwrap();
        status.wait_for(|s| s.is_connected()).await.unwrap();

        let snapshot = f.manager.snapshot().await;
        assert!(snapshot.connected);
        assert_eq!(
            snapshot.remote_media[0].audio_tracks,
            vec!["bob-audio".to_string()]
        );
        assert_eq!(f.relay.published_sources("meet-42", "alice").await.len(), 2);
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_after_max_attempts() {
        let f = fixture_with_policy(ReconnectPolicy {
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(10),
            max_attempts: 2,
        });
        f.manager
            .connect("meet-42", "alice", &CancellationToken::new())
            .await
            .unwrap();
        let mut status = f.manager.subscribe_status();

        f.relay.fail_next_connects(5).await;
        f.relay.drop_member("meet-42", "alice", "relay restart").await;

        status
            .wait_for(|s| matches!(s, ConnectionStatus::Failed { .. }))
            .await
            .unwrap();
        assert!(!f.manager.snapshot().await.connected);
        // Local capture is kept until the caller leaves.
        assert!(f.manager.local_state().await.audio_enabled);
    }

    #[tokio::test]
    async fn test_explicit_teardown_does_not_reconnect() {
        let f = fixture_with_policy(ReconnectPolicy {
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(10),
            max_attempts: 3,
        });
        f.manager
            .connect("meet-42", "alice", &CancellationToken::new())
            .await
            .unwrap();
        f.manager.teardown().await;
        settle().await;

        assert_eq!(f.relay.connect_count("meet-42").await, 1);
        assert_eq!(f.manager.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_apply_event_join_then_leave() {
        let mut state = MediaState::default();
        state.apply_event(RoomEvent::ParticipantJoined {
            participant_id: "bob".to_string(),
            tracks: vec![RemoteTrackInfo {
                track_id: "a".to_string(),
                kind: TrackKind::Audio,
            }],
        });
        state.apply_event(RoomEvent::TrackSubscribed {
            participant_id: "bob".to_string(),
            track: RemoteTrackInfo {
                track_id: "a".to_string(),
                kind: TrackKind::Audio,
            },
        });
        assert_eq!(state.media.media_for("bob").unwrap().track_count(), 1);

        state.apply_event(RoomEvent::ParticipantLeft {
            participant_id: "bob".to_string(),
        });
        assert!(state.media.is_empty());
        assert!(state.participants.is_empty());
    }
}
