//! End-to-end meeting scenarios against the loopback relay, synthetic
//! devices and the in-process presence hub.

use classmeet::error::MeetingError;
use classmeet::media::{
    ConnectionStatus, LoopbackRelay, LoopbackTokenIssuer, MediaSessionManager, ReconnectPolicy,
    SyntheticDevices, TrackKind, TrackSource,
};
use classmeet::meeting::{MeetingIdentity, MeetingPhase, MeetingStatusHandle, SessionOrchestrator};
use classmeet::presence::{MemoryPresenceHub, PresenceChannel};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Classroom {
    relay: LoopbackRelay,
    hub: MemoryPresenceHub,
    devices: SyntheticDevices,
}

impl Classroom {
    fn new() -> Self {
        Self {
            relay: LoopbackRelay::new(),
            hub: MemoryPresenceHub::new(),
            devices: SyntheticDevices::new(),
        }
    }

    fn media(&self, policy: ReconnectPolicy) -> MediaSessionManager {
        MediaSessionManager::new(
            Arc::new(LoopbackTokenIssuer::new(self.relay.clone())),
            Arc::new(self.relay.clone()),
            Arc::new(self.devices.clone()),
            policy,
        )
    }

    fn attendee(&self, participant_id: &str, name: &str, host: bool) -> SessionOrchestrator {
        let identity = MeetingIdentity::new("meet-42", "CS101", name)
            .unwrap()
            .with_participant_id(participant_id)
            .unwrap()
            .host(host);
        SessionOrchestrator::new(
            identity,
            self.media(ReconnectPolicy::disabled()),
            PresenceChannel::new(Arc::new(self.hub.clone())),
            MeetingStatusHandle::default(),
            "http://localhost:3000",
        )
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn remote_participant_tracks_are_aggregated_and_removed() {
    let room = Classroom::new();
    let alice = room.media(ReconnectPolicy::disabled());
    let joined = alice
        .connect("meet-42", "alice", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(joined.participant_count, 1);

    let bob = room.relay.join_remote("meet-42", "bob").await;
    bob.publish("bob-audio", TrackKind::Audio).await;
    bob.publish("bob-video", TrackKind::Video).await;
    settle().await;

    let with_bob = alice.snapshot().await;
    assert_eq!(with_bob.participant_count, 2);
    assert_eq!(with_bob.remote_media.len(), 1);
    let media = &with_bob.remote_media[0];
    assert_eq!(media.participant_id, "bob");
    assert_eq!(media.audio_tracks, vec!["bob-audio".to_string()]);
    assert_eq!(media.video_tracks, vec!["bob-video".to_string()]);

    bob.leave().await;
    settle().await;

    let after = alice.snapshot().await;
    assert!(after.remote_media.is_empty());
    assert_eq!(after.participant_count, with_bob.participant_count - 1);
}

#[tokio::test]
async fn unsubscribing_every_track_restores_aggregation() {
    let room = Classroom::new();
    let alice = room.media(ReconnectPolicy::disabled());
    alice
        .connect("meet-42", "alice", &CancellationToken::new())
        .await
        .unwrap();
    let bob = room.relay.join_remote("meet-42", "bob").await;
    settle().await;
    let before = alice.snapshot().await.remote_media;

    bob.publish("bob-audio", TrackKind::Audio).await;
    settle().await;
    assert_eq!(alice.snapshot().await.remote_media.len(), 1);

    bob.unpublish("bob-audio").await;
    settle().await;
    assert_eq!(alice.snapshot().await.remote_media, before);
}

#[tokio::test]
async fn alice_and_bob_see_each_other_in_the_meeting_view() {
    let room = Classroom::new();
    let mut alice = room.attendee("alice", "Alice", true);
    let mut bob = room.attendee("bob", "Bob", false);
    alice.join().await.unwrap();
    bob.join().await.unwrap();
    settle().await;

    let view = alice.view().await;
    assert_eq!(view.participant_count, 2);
    let names: Vec<_> = view
        .participants
        .iter()
        .map(|p| p.display_name.as_str())
        .collect();
    assert_eq!(names, vec!["Alice", "Bob"]);
    let bob_row = &view.participants[1];
    assert!(bob_row.in_media && bob_row.in_presence);
    assert!(bob_row.has_audio && bob_row.has_video);

    bob.leave().await.unwrap();
    settle().await;
    let view = alice.view().await;
    assert_eq!(view.participant_count, 1);
    assert_eq!(view.participants.len(), 1);
}

#[tokio::test]
async fn screen_share_swaps_video_publication_and_back() {
    let room = Classroom::new();
    let mut alice = room.attendee("alice", "Alice", true);
    alice.join().await.unwrap();
    assert_eq!(
        room.relay.published_sources("meet-42", "alice").await.len(),
        2
    );

    let sharing = alice.toggle_screen_share().await.unwrap();
    assert!(sharing.is_screen_sharing);
    assert!(!sharing.camera_published);
    let sources = room.relay.published_sources("meet-42", "alice").await;
    assert!(sources.contains(&TrackSource::Screen));
    assert!(!sources.contains(&TrackSource::Camera));

    let stopped = alice.toggle_screen_share().await.unwrap();
    assert!(!stopped.is_screen_sharing);
    assert!(stopped.camera_published);
    let sources = room.relay.published_sources("meet-42", "alice").await;
    assert!(sources.contains(&TrackSource::Camera));
    assert!(!sources.contains(&TrackSource::Screen));

    let screen = room.devices.last_of(TrackSource::Screen).unwrap();
    assert!(!screen.is_live());
}

#[tokio::test]
async fn toggles_pair_and_never_publish_camera_while_sharing() {
    let room = Classroom::new();
    let mut alice = room.attendee("alice", "Alice", false);
    alice.join().await.unwrap();

    for n in 1..=5 {
        let state = alice.toggle_microphone().await.unwrap();
        assert_eq!(state.is_muted, n % 2 == 1);
        let state = alice.toggle_camera().await.unwrap();
        assert_eq!(state.is_camera_off, n % 2 == 1);
    }

    for _ in 0..3 {
        let state = alice.toggle_screen_share().await.unwrap();
        assert!(!(state.is_screen_sharing && state.camera_published));
    }
}

#[tokio::test]
async fn discarding_before_the_credential_resolves_leaves_no_trace() {
    let room = Classroom::new();
    room.relay.set_token_delay(Duration::from_millis(200)).await;
    let media = room.media(ReconnectPolicy::disabled());
    let cancel = CancellationToken::new();

    let discard = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        discard.cancel();
    });

    let result = media.connect("meet-42", "alice", &cancel).await;
    assert_eq!(result.unwrap_err(), MeetingError::Cancelled);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let snapshot = media.snapshot().await;
    assert!(!snapshot.connected);
    assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
    assert!(snapshot.local.audio_track.is_none());
    assert!(!room.relay.is_member("meet-42", "alice").await);
    assert_eq!(room.devices.live_count(), 0);
}

#[tokio::test]
async fn leave_ends_every_local_track() {
    let room = Classroom::new();
    let mut alice = room.attendee("alice", "Alice", true);
    alice.join().await.unwrap();
    alice.toggle_screen_share().await.unwrap();
    assert_eq!(room.devices.live_count(), 3);

    alice.leave().await.unwrap();
    assert_eq!(room.devices.live_count(), 0);
    assert!(room.devices.acquired().iter().all(|track| !track.is_live()));
    assert_eq!(alice.view().await.phase, MeetingPhase::Ended);
}

#[tokio::test]
async fn blank_chat_messages_are_ignored() {
    let room = Classroom::new();
    let mut alice = room.attendee("alice", "Alice", true);
    let mut bob = room.attendee("bob", "Bob", false);
    alice.join().await.unwrap();
    bob.join().await.unwrap();

    alice.send_chat("Welcome to CS101").await.unwrap();
    settle().await;
    let before = bob.messages().await.len();

    assert!(!alice.send_chat("").await.unwrap());
    assert!(!alice.send_chat("   ").await.unwrap());
    settle().await;

    assert_eq!(bob.messages().await.len(), before);
    assert_eq!(alice.messages().await.len(), 1);
    assert_eq!(room.hub.history("meet-42").await.len(), 1);
}

#[tokio::test]
async fn relay_drop_reconnects_and_republishes() {
    let room = Classroom::new();
    let policy = ReconnectPolicy {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
        max_attempts: 3,
    };
    let alice = room.media(policy);
    alice
        .connect("meet-42", "alice", &CancellationToken::new())
        .await
        .unwrap();
    let mut status = alice.subscribe_status();

    room.relay.drop_member("meet-42", "alice", "network").await;
    status
        .wait_for(|s| matches!(s, ConnectionStatus::Reconnecting { .. }))
        .await
        .unwrap();
    status
        .wait_for(|s| *s == ConnectionStatus::Connected)
        .await
        .unwrap();

    assert!(room.relay.is_member("meet-42", "alice").await);
    let sources = room.relay.published_sources("meet-42", "alice").await;
    assert!(sources.contains(&TrackSource::Microphone));
    assert!(sources.contains(&TrackSource::Camera));
}
