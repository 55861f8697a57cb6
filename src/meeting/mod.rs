//! Meeting lifecycle.
//!
//! Joins the media session and the presence channel as one meeting, tracks
//! the lifecycle phase and duration, and runs the leave and feedback flow.

pub mod feedback;
pub mod identity;
pub mod invite;
pub mod orchestrator;
pub mod status;

pub use feedback::{Feedback, FeedbackSink, FeedbackSubmission, HttpFeedbackSink, Rating};
pub use identity::MeetingIdentity;
pub use invite::{build_invite_link, InviteCopy};
pub use orchestrator::{
    FeedbackOutcome, JoinOutcome, LeaveSummary, MeetingView, ParticipantView, SessionOrchestrator,
};
pub use status::{format_duration, MeetingPhase, MeetingState, MeetingStatusHandle};
