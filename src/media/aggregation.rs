//! Remote-track aggregation.
//!
//! Keyed collection of participant id → subscribed tracks. A participant has
//! an entry only while at least one of its tracks is subscribed; removing the
//! last track removes the entry. The playable handle for a participant is
//! derived from the set on demand rather than mutated in place.

use serde::Serialize;
use std::collections::BTreeMap;

use super::relay::RemoteTrackInfo;
use super::track::TrackKind;

/// Playable media for one remote participant, derived from its track set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteMedia {
    pub participant_id: String,
    pub audio_tracks: Vec<String>,
    pub video_tracks: Vec<String>,
}

impl RemoteMedia {
    pub fn has_audio(&self) -> bool {
        !self.audio_tracks.is_empty()
    }

    pub fn has_video(&self) -> bool {
        !self.video_tracks.is_empty()
    }

    pub fn track_count(&self) -> usize {
        self.audio_tracks.len() + self.video_tracks.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteMediaMap {
    entries: BTreeMap<String, BTreeMap<String, TrackKind>>,
}

impl RemoteMediaMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a subscribed track. Returns `false` if it was already attached.
    pub fn attach(&mut self, participant_id: &str, track: &RemoteTrackInfo) -> bool {
        self.entries
            .entry(participant_id.to_string())
            .or_default()
            .insert(track.track_id.clone(), track.kind)
            .is_none()
    }

    /// Detach a track. Returns `false` if it was not attached.
    pub fn detach(&mut self, participant_id: &str, track_id: &str) -> bool {
        let Some(tracks) = self.entries.get_mut(participant_id) else {
            return false;
        };
        let removed = tracks.remove(track_id).is_some();
        if tracks.is_empty() {
            self.entries.remove(participant_id);
        }
        removed
    }

    /// Drop every track of a participant. Returns the number removed.
    pub fn remove_participant(&mut self, participant_id: &str) -> usize {
        self.entries
            .remove(participant_id)
            .map(|tracks| tracks.len())
            .unwrap_or(0)
    }

    pub fn contains(&self, participant_id: &str) -> bool {
        self.entries.contains_key(participant_id)
    }

    pub fn media_for(&self, participant_id: &str) -> Option<RemoteMedia> {
        self.entries
            .get(participant_id)
            .map(|tracks| Self::derive(participant_id, tracks))
    }

    pub fn all(&self) -> Vec<RemoteMedia> {
        self.entries
            .iter()
            .map(|(id, tracks)| Self::derive(id, tracks))
            .collect()
    }

    pub fn participant_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn derive(participant_id: &str, tracks: &BTreeMap<String, TrackKind>) -> RemoteMedia {
        let mut media = RemoteMedia {
            participant_id: participant_id.to_string(),
            audio_tracks: Vec::new(),
            video_tracks: Vec::new(),
        };
        for (track_id, kind) in tracks {
            match kind {
                TrackKind::Audio => media.audio_tracks.push(track_id.clone()),
                TrackKind::Video => media.video_tracks.push(track_id.clone()),
            }
        }
        media
    }
}
