//! Caller-supplied meeting identity.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MeetingError, MeetingResult};

const MAX_DISPLAY_NAME: usize = 64;

fn id_pattern() -> MeetingResult<Regex> {
    Regex::new(r"^[A-Za-z0-9_-]{1,64}$")
        .map_err(|e| MeetingError::InvalidState(format!("invalid id pattern: {e}")))
}

/// Who joins which meeting, and in what capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingIdentity {
    pub session_id: String,
    pub title: String,
    pub display_name: String,
    /// Keys the participant in both the media room and the presence roster.
    pub participant_id: String,
    pub is_host: bool,
    pub is_guest: bool,
}

impl MeetingIdentity {
    /// Validate the inputs and derive a participant id from the display name.
    pub fn new(session_id: &str, title: &str, display_name: &str) -> MeetingResult<Self> {
        let session_id = session_id.trim();
        if !id_pattern()?.is_match(session_id) {
            return Err(MeetingError::InvalidInput(format!(
                "session id must be 1-64 letters, digits, '-' or '_': {session_id:?}"
            )));
        }

        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(MeetingError::InvalidInput(
                "display name is required".to_string(),
            ));
        }
        if display_name.chars().count() > MAX_DISPLAY_NAME {
            return Err(MeetingError::InvalidInput(format!(
                "display name longer than {MAX_DISPLAY_NAME} characters"
            )));
        }

        let title = match title.trim() {
            "" => session_id.to_string(),
            t => t.to_string(),
        };

        Ok(Self {
            session_id: session_id.to_string(),
            title,
            display_name: display_name.to_string(),
            participant_id: derive_participant_id(display_name)?,
            is_host: false,
            is_guest: false,
        })
    }

    pub fn with_participant_id(mut self, participant_id: &str) -> MeetingResult<Self> {
        let participant_id = participant_id.trim();
        if !id_pattern()?.is_match(participant_id) {
            return Err(MeetingError::InvalidInput(format!(
                "invalid participant id: {participant_id:?}"
            )));
        }
        self.participant_id = participant_id.to_string();
        Ok(self)
    }

    pub fn host(mut self, is_host: bool) -> Self {
        self.is_host = is_host;
        self
    }

    pub fn guest(mut self, is_guest: bool) -> Self {
        self.is_guest = is_guest;
        self
    }
}

/// `alice-smith-1a2b3c4d`: slug of the name plus a random suffix.
fn derive_participant_id(display_name: &str) -> MeetingResult<String> {
    let non_slug = Regex::new(r"[^a-z0-9]+")
        .map_err(|e| MeetingError::InvalidState(format!("invalid slug pattern: {e}")))?;
    let lower = display_name.to_lowercase();
    let slug = non_slug.replace_all(&lower, "-");
    let slug: String = slug.trim_matches('-').chars().take(40).collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let suffix = &suffix[..8];
    if slug.is_empty() {
        Ok(format!("guest-{suffix}"))
    } else {
        Ok(format!("{slug}-{suffix}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identity() {
        let identity = MeetingIdentity::new("meet-42", "CS101 Office Hours", "Alice Smith")
            .unwrap()
            .host(true);
        assert_eq!(identity.session_id, "meet-42");
        assert!(identity.participant_id.starts_with("alice-smith-"));
        assert!(identity.is_host);
        assert!(!identity.is_guest);
    }

    #[test]
    fn test_title_defaults_to_session_id() {
        let identity = MeetingIdentity::new("meet-42", "  ", "Bob").unwrap();
        assert_eq!(identity.title, "meet-42");
    }

    #[test]
    fn test_rejects_bad_session_ids() {
        let long = "x".repeat(65);
        for bad in ["", "has space", "semi;colon", long.as_str()] {
            assert!(
                matches!(
                    MeetingIdentity::new(bad, "t", "Alice"),
                    Err(MeetingError::InvalidInput(_))
                ),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_rejects_blank_display_name() {
        assert!(MeetingIdentity::new("meet-42", "t", "   ").is_err());
    }

    #[test]
    fn test_non_ascii_name_gets_guest_id() {
        let identity = MeetingIdentity::new("meet-42", "t", "李雷").unwrap();
        assert!(identity.participant_id.starts_with("guest-"));
        assert!(id_pattern().unwrap().is_match(&identity.participant_id));
    }

    #[test]
    fn test_explicit_participant_id() {
        let identity = MeetingIdentity::new("meet-42", "t", "Alice")
            .unwrap()
            .with_participant_id("alice")
            .unwrap();
        assert_eq!(identity.participant_id, "alice");
    }
}
