//! Invite links.

use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::error::{MeetingError, MeetingResult};
use crate::text_io::ClipboardSink;

/// Build `<base>/meeting/<session_id>?guest=true`.
pub fn build_invite_link(base_url: &str, session_id: &str) -> MeetingResult<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| MeetingError::InvalidInput(format!("invalid invite base url: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| {
            MeetingError::InvalidInput(format!("invite base url cannot carry a path: {base_url}"))
        })?
        .pop_if_empty()
        .push("meeting")
        .push(session_id);
    url.set_query(None);
    url.query_pairs_mut().append_pair("guest", "true");
    Ok(url)
}

/// How an invite link reached the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", content = "link", rename_all = "snake_case")]
pub enum InviteCopy {
    Copied(String),
    /// No clipboard; the link must be selected and copied by hand.
    Manual(String),
}

impl InviteCopy {
    pub fn link(&self) -> &str {
        match self {
            Self::Copied(link) | Self::Manual(link) => link,
        }
    }
}

/// Copy the link, falling back to manual selection when the clipboard fails.
pub async fn copy_invite(clipboard: Option<&dyn ClipboardSink>, link: &Url) -> InviteCopy {
    let text = link.to_string();
    let Some(clipboard) = clipboard else {
        return InviteCopy::Manual(text);
    };
    match clipboard.copy_text(&text).await {
        Ok(()) => {
            info!("Invite link copied to clipboard");
            InviteCopy::Copied(text)
        }
        Err(e) => {
            warn!("Clipboard unavailable, showing invite link for manual copy: {}", e);
            InviteCopy::Manual(text)
        }
    }
}
