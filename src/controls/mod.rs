//! Device control surface.
//!
//! A thin view over the media session manager. Nothing here stores device
//! state; every flag is derived from the local tracks on each call.

use serde::{Deserialize, Serialize};

use crate::error::MeetingResult;
use crate::media::{LocalMediaState, MediaSessionManager};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub is_muted: bool,
    pub is_camera_off: bool,
    pub is_screen_sharing: bool,
    pub camera_published: bool,
}

impl From<&LocalMediaState> for DeviceState {
    fn from(local: &LocalMediaState) -> Self {
        Self {
            is_muted: !local.audio_enabled,
            is_camera_off: !local.video_enabled,
            is_screen_sharing: local.screen_sharing,
            camera_published: local.camera_published(),
        }
    }
}

#[derive(Clone)]
pub struct DeviceControls {
    media: MediaSessionManager,
}

impl DeviceControls {
    pub fn new(media: MediaSessionManager) -> Self {
        Self { media }
    }

    pub async fn state(&self) -> DeviceState {
        DeviceState::from(&self.media.local_state().await)
    }

    pub async fn toggle_microphone(&self) -> MeetingResult<DeviceState> {
        self.media.toggle_microphone().await?;
        Ok(self.state().await)
    }

    pub async fn toggle_camera(&self) -> MeetingResult<DeviceState> {
        self.media.toggle_camera().await?;
        Ok(self.state().await)
    }

    pub async fn toggle_screen_share(&self) -> MeetingResult<DeviceState> {
        self.media.toggle_screen_share().await?;
        Ok(self.state().await)
    }
}
