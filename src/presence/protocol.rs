//! Presence and chat wire types.
//!
//! Frames are JSON objects tagged by `type`, with camelCase fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub participant_id: String,
    pub display_name: String,
    #[serde(default)]
    pub is_host: bool,
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default)]
    pub is_camera_off: bool,
    #[serde(default)]
    pub is_screen_sharing: bool,
}

impl RosterEntry {
    pub fn new(participant_id: &str, display_name: &str, is_host: bool) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            display_name: display_name.to_string(),
            is_host,
            is_muted: false,
            is_camera_off: false,
            is_screen_sharing: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub sender_id: String,
    /// Sender's display name when the message was sent.
    pub display_name: String,
    pub text: String,
    /// Channel-assigned; `None` while a local message awaits its echo.
    #[serde(default)]
    pub sequence: Option<u64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl ChatMessage {
    pub fn is_pending(&self) -> bool {
        self.sequence.is_none()
    }
}

/// Device flags for one participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusFlags {
    pub is_muted: bool,
    pub is_camera_off: bool,
    pub is_screen_sharing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Chat { client_id: String, text: String },
    Status(StatusFlags),
    Leave,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Roster {
        participants: Vec<RosterEntry>,
    },
    History {
        messages: Vec<ChatMessage>,
    },
    ParticipantJoined {
        participant: RosterEntry,
    },
    #[serde(rename_all = "camelCase")]
    ParticipantLeft {
        participant_id: String,
    },
    #[serde(rename_all = "camelCase")]
    ParticipantStatus {
        participant_id: String,
        #[serde(flatten)]
        flags: StatusFlags,
    },
    Chat {
        message: ChatMessage,
    },
}
