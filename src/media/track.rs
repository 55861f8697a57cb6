//! Local capture handles.
//!
//! A `LocalTrack` is a cheap, cloneable handle to one captured device
//! (microphone, camera or display). The enabled flag mutes the track without
//! unpublishing it; stopping the track ends the capture for good.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
}

impl TrackSource {
    pub fn kind(&self) -> TrackKind {
        match self {
            Self::Microphone => TrackKind::Audio,
            Self::Camera | Self::Screen => TrackKind::Video,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Microphone => "microphone",
            Self::Camera => "camera",
            Self::Screen => "screen",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Live,
    Ended,
}

#[derive(Clone)]
pub struct LocalTrack {
    inner: Arc<LocalTrackInner>,
}

struct LocalTrackInner {
    id: String,
    source: TrackSource,
    enabled: AtomicBool,
    state: watch::Sender<TrackState>,
}

impl LocalTrack {
    pub fn new(source: TrackSource) -> Self {
        Self::with_id(format!("{}-{}", source.as_str(), uuid::Uuid::new_v4()), source)
    }

    pub fn with_id(id: impl Into<String>, source: TrackSource) -> Self {
        let (state, _) = watch::channel(TrackState::Live);
        Self {
            inner: Arc::new(LocalTrackInner {
                id: id.into(),
                source,
                enabled: AtomicBool::new(true),
                state,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn source(&self) -> TrackSource {
        self.inner.source
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.source.kind()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Flip the enabled flag and return the new value.
    pub fn toggle_enabled(&self) -> bool {
        !self.inner.enabled.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn state(&self) -> TrackState {
        *self.inner.state.borrow()
    }

    pub fn is_live(&self) -> bool {
        self.state() == TrackState::Live
    }

    /// End the capture. Returns `false` if the track had already ended.
    pub fn stop(&self) -> bool {
        let stopped = self.inner.state.send_if_modified(|state| {
            if *state == TrackState::Ended {
                false
            } else {
                *state = TrackState::Ended;
                true
            }
        });
        if stopped {
            debug!("Stopped {} track {}", self.source().as_str(), self.id());
        }
        stopped
    }

    /// Resolves once the track has ended, whoever ended it.
    pub async fn ended(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| *state == TrackState::Ended).await;
    }

    /// Whether two handles refer to the same capture.
    pub fn same_track(&self, other: &LocalTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.inner.id)
            .field("source", &self.inner.source)
            .field("enabled", &self.is_enabled())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_source_kind() {
        assert_eq!(TrackSource::Microphone.kind(), TrackKind::Audio);
        assert_eq!(TrackSource::Camera.kind(), TrackKind::Video);
        assert_eq!(TrackSource::Screen.kind(), TrackKind::Video);
    }

    #[test]
    fn test_toggle_enabled_pairs() {
        let track = LocalTrack::new(TrackSource::Microphone);
        assert!(track.is_enabled());
        for n in 1..=7 {
            track.toggle_enabled();
            assert_eq!(track.is_enabled(), n % 2 == 0, "after {n} toggles");
        }
    }

    #[test]
    fn test_toggle_returns_new_value() {
        let track = LocalTrack::new(TrackSource::Camera);
        assert!(!track.toggle_enabled());
        assert!(track.toggle_enabled());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let track = LocalTrack::new(TrackSource::Camera);
        assert!(track.is_live());
        assert!(track.stop());
        assert!(!track.stop());
        assert_eq!(track.state(), TrackState::Ended);
    }

    #[tokio::test]
    async fn test_ended_resolves_after_stop() {
        let track = LocalTrack::new(TrackSource::Screen);
        let watcher = track.clone();
        let handle = tokio::spawn(async move { watcher.ended().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        track.stop();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_same_track() {
        let a = LocalTrack::new(TrackSource::Camera);
        let b = a.clone();
        let c = LocalTrack::new(TrackSource::Camera);
        assert!(a.same_track(&b));
        assert!(!a.same_track(&c));
    }
}
