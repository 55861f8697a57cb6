//! Meeting lifecycle orchestrator.
//!
//! Composes the media session and the presence channel into one meeting:
//! Joining → Connected → Leaving → Ended, followed by optional feedback.
//!
//! All collaborators are injected via constructor.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::controls::{DeviceControls, DeviceState};
use crate::error::{MeetingError, MeetingResult};
use crate::media::{ConnectionStatus, MediaSessionManager, MediaSnapshot};
use crate::presence::{ChatMessage, PresenceChannel, PresenceEndpoint, PresenceSnapshot, RosterEntry};
use crate::text_io::ClipboardSink;

use super::feedback::{Feedback, FeedbackSink, FeedbackSubmission};
use super::identity::MeetingIdentity;
use super::invite::{build_invite_link, copy_invite, InviteCopy};
use super::status::{MeetingPhase, MeetingStatusHandle};

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub media: MediaSnapshot,
    /// `None` when chat could not be reached; the meeting runs without it.
    pub presence: Option<PresenceSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaveSummary {
    pub title: String,
    pub duration: String,
    pub tracks_stopped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum FeedbackOutcome {
    Submitted,
    Skipped,
    NotConfigured,
    Failed(String),
}

/// One row of the merged participant list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantView {
    pub participant_id: String,
    pub display_name: String,
    pub is_local: bool,
    pub is_host: bool,
    pub is_muted: bool,
    pub is_camera_off: bool,
    pub is_screen_sharing: bool,
    pub in_media: bool,
    pub in_presence: bool,
    pub has_audio: bool,
    pub has_video: bool,
}

/// Everything a presentation layer needs, merged from both channels.
#[derive(Debug, Clone, Serialize)]
pub struct MeetingView {
    pub session_id: String,
    pub title: String,
    pub phase: MeetingPhase,
    pub duration: String,
    pub media_status: ConnectionStatus,
    pub presence_connected: bool,
    pub device: DeviceState,
    pub participant_count: usize,
    pub participants: Vec<ParticipantView>,
    pub messages: Vec<ChatMessage>,
    pub notices: Vec<String>,
    pub last_error: Option<String>,
}

pub struct SessionOrchestrator {
    identity: MeetingIdentity,
    media: MediaSessionManager,
    controls: DeviceControls,
    presence: PresenceChannel,
    feedback: Option<Box<dyn FeedbackSink>>,
    clipboard: Option<Arc<dyn ClipboardSink>>,
    status: MeetingStatusHandle,
    invite_base_url: String,
    cancel: CancellationToken,
    watchers: Vec<JoinHandle<()>>,
}

impl SessionOrchestrator {
    pub fn new(
        identity: MeetingIdentity,
        media: MediaSessionManager,
        presence: PresenceChannel,
        status: MeetingStatusHandle,
        invite_base_url: &str,
    ) -> Self {
        Self {
            identity,
            controls: DeviceControls::new(media.clone()),
            media,
            presence,
            feedback: None,
            clipboard: None,
            status,
            invite_base_url: invite_base_url.to_string(),
            cancel: CancellationToken::new(),
            watchers: Vec::new(),
        }
    }

    pub fn with_feedback(mut self, sink: Box<dyn FeedbackSink>) -> Self {
        self.feedback = Some(sink);
        self
    }

    pub fn with_clipboard(mut self, clipboard: Arc<dyn ClipboardSink>) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    pub fn identity(&self) -> &MeetingIdentity {
        &self.identity
    }

    pub fn status_handle(&self) -> MeetingStatusHandle {
        self.status.clone()
    }

    /// Token that discards this meeting view. Cancelling it while a join is
    /// pending suppresses every state update from that join.
    pub fn discard_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Connect media and presence concurrently.
    ///
    /// Media is required: if it fails the meeting stays in `Joining` with a
    /// notice. Presence is optional: if it fails the meeting is `Connected`
    /// without chat.
    pub async fn join(&mut self) -> MeetingResult<JoinOutcome> {
        let current = self.status.get().await;
        if current.phase != MeetingPhase::Joining {
            return Err(MeetingError::InvalidState(format!(
                "cannot join while {}",
                current.phase.as_str()
            )));
        }
        if current.session_id.is_none() {
            self.status
                .begin_join(&self.identity.session_id, &self.identity.title)
                .await;
        }

        info!(
            "Joining meeting {} as {} ({})",
            self.identity.session_id, self.identity.display_name, self.identity.participant_id
        );

        let endpoint = PresenceEndpoint {
            session_id: self.identity.session_id.clone(),
            participant_id: self.identity.participant_id.clone(),
            display_name: self.identity.display_name.clone(),
            is_host: self.identity.is_host,
        };
        let (media_result, presence_result) = tokio::join!(
            self.media.connect(
                &self.identity.session_id,
                &self.identity.participant_id,
                &self.cancel
            ),
            self.presence.connect(endpoint, &self.cancel),
        );

        if self.cancel.is_cancelled() {
            debug!("Meeting view discarded during join");
            if media_result.is_ok() {
                self.media.teardown().await;
            }
            if presence_result.is_ok() {
                self.presence.disconnect().await;
            }
            return Err(MeetingError::Cancelled);
        }

        let media = match media_result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Failed to join media session: {}", e);
                if presence_result.is_ok() {
                    self.presence.disconnect().await;
                }
                self.status.set_error(e.to_string()).await;
                return Err(e);
            }
        };

        let presence = match presence_result {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Chat unavailable, continuing without it: {}", e);
                self.status.add_notice(format!("Chat unavailable: {e}")).await;
                None
            }
        };

        self.status
            .set_connected(media.connected, presence.is_some())
            .await;
        if presence.is_some() {
            let device = self.controls.state().await;
            if let Err(e) = self.presence.update_status(device).await {
                debug!("Initial status push failed: {}", e);
            }
        }
        self.spawn_watchers();

        info!(
            "Meeting {} connected ({} participant(s))",
            self.identity.session_id, media.participant_count
        );
        Ok(JoinOutcome { media, presence })
    }

    fn spawn_watchers(&mut self) {
        let mut local = self.media.subscribe_local();
        let presence = self.presence.clone();
        self.watchers.push(tokio::spawn(async move {
            while local.changed().await.is_ok() {
                let device = DeviceState::from(&*local.borrow_and_update());
                if let Err(e) = presence.update_status(device).await {
                    debug!("Status push skipped: {}", e);
                }
            }
        }));

        let mut connection = self.media.subscribe_status();
        let status = self.status.clone();
        self.watchers.push(tokio::spawn(async move {
            while connection.changed().await.is_ok() {
                let current = connection.borrow_and_update().clone();
                match current {
                    ConnectionStatus::Connected => status.set_media_connected(true).await,
                    ConnectionStatus::Reconnecting { attempt, .. } => {
                        status.set_media_connected(false).await;
                        if attempt == 1 {
                            status
                                .add_notice("Connection lost, reconnecting".to_string())
                                .await;
                        }
                    }
                    ConnectionStatus::Failed { reason } => {
                        status.set_media_connected(false).await;
                        status
                            .add_notice(format!("Media connection failed: {reason}"))
                            .await;
                    }
                    ConnectionStatus::Disconnected => status.set_media_connected(false).await,
                }
            }
        }));
    }

    async fn ensure_connected(&self) -> MeetingResult<()> {
        match self.status.get().await.phase {
            MeetingPhase::Connected => Ok(()),
            _ => Err(MeetingError::NotConnected),
        }
    }

    async fn control_result(
        &self,
        result: MeetingResult<DeviceState>,
    ) -> MeetingResult<DeviceState> {
        if let Err(e) = &result {
            if e.is_user_notice() {
                self.status.add_notice(e.to_string()).await;
            }
        }
        result
    }

    pub async fn toggle_microphone(&self) -> MeetingResult<DeviceState> {
        self.ensure_connected().await?;
        let result = self.controls.toggle_microphone().await;
        self.control_result(result).await
    }

    pub async fn toggle_camera(&self) -> MeetingResult<DeviceState> {
        self.ensure_connected().await?;
        let result = self.controls.toggle_camera().await;
        self.control_result(result).await
    }

    pub async fn toggle_screen_share(&self) -> MeetingResult<DeviceState> {
        self.ensure_connected().await?;
        let result = self.controls.toggle_screen_share().await;
        self.control_result(result).await
    }

    /// Send a chat message. Blank text is a no-op returning `false`.
    pub async fn send_chat(&self, text: &str) -> MeetingResult<bool> {
        self.ensure_connected().await?;
        self.presence.send_message(text).await
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.presence.messages().await
    }

    pub async fn view(&self) -> MeetingView {
        let state = self.status.get().await;
        let media = self.media.snapshot().await;
        let presence = self.presence.snapshot().await;
        let device = DeviceState::from(&media.local);

        MeetingView {
            session_id: self.identity.session_id.clone(),
            title: self.identity.title.clone(),
            phase: state.phase,
            duration: state.duration_label(),
            media_status: media.status.clone(),
            presence_connected: presence.connected,
            device,
            participant_count: media.participant_count,
            participants: reconcile_participants(&self.identity, device, &media, &presence.roster),
            messages: presence.messages,
            notices: state.notices.iter().cloned().collect(),
            last_error: state.last_error,
        }
    }

    pub fn invite_link(&self) -> MeetingResult<Url> {
        build_invite_link(&self.invite_base_url, &self.identity.session_id)
    }

    /// Copy the invite link, or hand it back for manual copying.
    pub async fn copy_invite_link(&self) -> MeetingResult<InviteCopy> {
        let link = self.invite_link()?;
        Ok(copy_invite(self.clipboard.as_deref(), &link).await)
    }

    /// Release every local track, leave both channels and end the meeting.
    pub async fn leave(&mut self) -> MeetingResult<LeaveSummary> {
        let phase = self.status.get().await.phase;
        if matches!(phase, MeetingPhase::Leaving | MeetingPhase::Ended) {
            return Err(MeetingError::InvalidState(format!(
                "meeting already {}",
                phase.as_str()
            )));
        }

        info!("Leaving meeting {}", self.identity.session_id);
        self.status.set_phase(MeetingPhase::Leaving).await;
        self.cancel.cancel();
        for watcher in self.watchers.drain(..) {
            watcher.abort();
        }

        let tracks_stopped = self.media.teardown().await;
        self.presence.disconnect().await;
        self.status.set_media_connected(false).await;
        self.status.set_presence_connected(false).await;
        self.status.set_phase(MeetingPhase::Ended).await;

        let duration = self.status.get().await.duration_label();
        info!(
            "Meeting {} ended after {} ({} track(s) released)",
            self.identity.session_id, duration, tracks_stopped
        );
        Ok(LeaveSummary {
            title: self.identity.title.clone(),
            duration,
            tracks_stopped,
        })
    }

    /// Best-effort feedback submission. Never fails.
    pub async fn submit_feedback(&self, feedback: Option<Feedback>) -> FeedbackOutcome {
        let Some(feedback) = feedback else {
            info!("Feedback skipped");
            return FeedbackOutcome::Skipped;
        };
        let Some(sink) = &self.feedback else {
            info!(
                "No feedback endpoint configured; dropping {}-star rating",
                feedback.rating.value()
            );
            return FeedbackOutcome::NotConfigured;
        };

        let submission = FeedbackSubmission::new(&self.identity.title, &feedback);
        match sink.submit(&submission).await {
            Ok(()) => {
                info!("Feedback submitted");
                FeedbackOutcome::Submitted
            }
            Err(e) => {
                warn!("Feedback submission failed: {}", e);
                FeedbackOutcome::Failed(e.to_string())
            }
        }
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        self.cancel.cancel();
        for watcher in self.watchers.drain(..) {
            watcher.abort();
        }
    }
}

/// Union of the presence roster and the media participants, keyed by
/// participant id. The local participant comes first and its flags come from
/// the device state, never from the roster.
pub fn reconcile_participants(
    identity: &MeetingIdentity,
    device: DeviceState,
    media: &MediaSnapshot,
    roster: &[RosterEntry],
) -> Vec<ParticipantView> {
    let local = ParticipantView {
        participant_id: identity.participant_id.clone(),
        display_name: identity.display_name.clone(),
        is_local: true,
        is_host: identity.is_host,
        is_muted: device.is_muted,
        is_camera_off: device.is_camera_off,
        is_screen_sharing: device.is_screen_sharing,
        in_media: media.local.audio_track.is_some(),
        in_presence: roster
            .iter()
            .any(|entry| entry.participant_id == identity.participant_id),
        has_audio: media.local.audio_enabled,
        has_video: media.local.published_video.is_some(),
    };

    let mut remote: BTreeMap<String, ParticipantView> = BTreeMap::new();
    for entry in roster {
        if entry.participant_id == identity.participant_id {
            continue;
        }
        remote.insert(
            entry.participant_id.clone(),
            ParticipantView {
                participant_id: entry.participant_id.clone(),
                display_name: entry.display_name.clone(),
                is_local: false,
                is_host: entry.is_host,
                is_muted: entry.is_muted,
                is_camera_off: entry.is_camera_off,
                is_screen_sharing: entry.is_screen_sharing,
                in_media: false,
                in_presence: true,
                has_audio: false,
                has_video: false,
            },
        );
    }

    for participant_id in &media.remote_participants {
        if *participant_id == identity.participant_id {
            continue;
        }
        let view = remote
            .entry(participant_id.clone())
            .or_insert_with(|| ParticipantView {
                participant_id: participant_id.clone(),
                display_name: participant_id.clone(),
                is_local: false,
                is_host: false,
                is_muted: false,
                is_camera_off: false,
                is_screen_sharing: false,
                in_media: true,
                in_presence: false,
                has_audio: false,
                has_video: false,
            });
        view.in_media = true;
    }

    for media_entry in &media.remote_media {
        if let Some(view) = remote.get_mut(&media_entry.participant_id) {
            view.has_audio = media_entry.has_audio();
            view.has_video = media_entry.has_video();
        }
    }

    std::iter::once(local).chain(remote.into_values()).collect()
}
