//! Collaborator seams for the media layer.
//!
//! The relay, the token issuer and the capture devices are external to the
//! coordinator. Each is a trait so the session manager can be driven by a
//! real relay binding, the in-process loopback relay, or a test double.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::track::{LocalTrack, TrackKind};
use crate::error::MeetingResult;

/// Issues short-lived relay credentials for `(identity, session)`.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, identity: &str, session_id: &str) -> MeetingResult<String>;
}

/// Local capture devices.
///
/// Acquisition may suspend indefinitely on a permission prompt.
#[async_trait]
pub trait DeviceCapture: Send + Sync {
    async fn acquire_microphone(&self) -> MeetingResult<LocalTrack>;
    async fn acquire_camera(&self) -> MeetingResult<LocalTrack>;
    async fn acquire_display(&self) -> MeetingResult<LocalTrack>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomOptions {
    pub room_name: String,
    /// Identity the credential was issued for.
    pub identity: String,
    pub audio: bool,
    pub video: bool,
}

/// A track published by a remote participant and subscribed locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteTrackInfo {
    pub track_id: String,
    pub kind: TrackKind,
}

/// A remote participant together with the tracks already subscribed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParticipantSnapshot {
    pub participant_id: String,
    pub tracks: Vec<RemoteTrackInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// A participant joined. `tracks` lists what was already subscribed when
    /// the join was observed; later tracks arrive as `TrackSubscribed`.
    ParticipantJoined {
        participant_id: String,
        tracks: Vec<RemoteTrackInfo>,
    },
    ParticipantLeft {
        participant_id: String,
    },
    TrackSubscribed {
        participant_id: String,
        track: RemoteTrackInfo,
    },
    TrackUnsubscribed {
        participant_id: String,
        track_id: String,
    },
    /// Relay-initiated disconnect.
    Disconnected {
        reason: String,
    },
}

/// Result of a successful room connect.
///
/// `participants` and `events` are taken at the same instant: every event on
/// the receiver happened after the snapshot, so enumerating the snapshot and
/// then draining the receiver neither misses nor repeats a track.
pub struct RoomConnection {
    pub room: Box<dyn RelayRoom>,
    pub participants: Vec<RemoteParticipantSnapshot>,
    pub events: mpsc::UnboundedReceiver<RoomEvent>,
}

impl std::fmt::Debug for RoomConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomConnection")
            .field("participants", &self.participants)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait MediaRelay: Send + Sync {
    async fn connect(&self, credential: &str, options: RoomOptions)
        -> MeetingResult<RoomConnection>;
}

/// A connected relay room as seen by the local participant.
#[async_trait]
pub trait RelayRoom: Send + Sync {
    fn local_identity(&self) -> &str;
    async fn publish_track(&self, track: &LocalTrack) -> MeetingResult<()>;
    async fn unpublish_track(&self, track_id: &str) -> MeetingResult<()>;
    async fn disconnect(&self);
}
