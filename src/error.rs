//! Error taxonomy for the meeting coordinator.

use thiserror::Error;

/// Errors surfaced by the media session, presence channel and orchestrator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MeetingError {
    /// The access credential could not be obtained.
    #[error("Failed to obtain access token: {0}")]
    TokenFetch(String),

    /// The relay rejected the credential or the handshake failed.
    #[error("Failed to connect to media room: {0}")]
    RoomConnect(String),

    /// Camera or microphone denied or unavailable.
    #[error("Failed to acquire local device: {0}")]
    DeviceAcquisition(String),

    /// Display capture denied, unsupported, or publication failed.
    #[error("Screen share failed: {0}")]
    ScreenShare(String),

    #[error("Presence channel error: {0}")]
    PresenceChannel(String),

    #[error("Feedback submission failed: {0}")]
    FeedbackSubmit(String),

    /// The caller discarded the session while the operation was pending.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Not connected to a meeting")]
    NotConnected,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Caller-supplied meeting identity or feedback was malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl MeetingError {
    /// Whether the error should be shown to the user as a non-fatal notice.
    pub fn is_user_notice(&self) -> bool {
        matches!(
            self,
            Self::TokenFetch(_)
                | Self::RoomConnect(_)
                | Self::DeviceAcquisition(_)
                | Self::ScreenShare(_)
        )
    }
}

pub type MeetingResult<T> = Result<T, MeetingError>;
