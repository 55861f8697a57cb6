//! Meeting status types and shared state handle.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Most recent user-visible notices kept in the state.
pub const MAX_NOTICES: usize = 20;

/// Phase of a meeting lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingPhase {
    Joining,
    Connected,
    Leaving,
    Ended,
}

impl MeetingPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Joining => "joining",
            Self::Connected => "connected",
            Self::Leaving => "leaving",
            Self::Ended => "ended",
        }
    }
}

/// Current meeting state, readable by API handlers.
#[derive(Debug, Clone)]
pub struct MeetingState {
    pub phase: MeetingPhase,
    pub session_id: Option<String>,
    pub title: Option<String>,
    /// Monotonic instant the meeting became `Connected`.
    pub connected_at: Option<Instant>,
    pub ended_at: Option<Instant>,
    pub media_connected: bool,
    pub presence_connected: bool,
    pub last_error: Option<String>,
    pub notices: VecDeque<String>,
}

impl Default for MeetingState {
    fn default() -> Self {
        Self {
            phase: MeetingPhase::Joining,
            session_id: None,
            title: None,
            connected_at: None,
            ended_at: None,
            media_connected: false,
            presence_connected: false,
            last_error: None,
            notices: VecDeque::new(),
        }
    }
}

impl MeetingState {
    /// Time spent connected; frozen once the meeting ends.
    pub fn duration(&self) -> Option<Duration> {
        let started = self.connected_at?;
        let until = self.ended_at.unwrap_or_else(Instant::now);
        Some(until.saturating_duration_since(started))
    }

    /// Duration as `mm:ss`, `00:00` before the meeting connects.
    pub fn duration_label(&self) -> String {
        format_duration(self.duration().unwrap_or_default())
    }

    /// Connected with one of the two channels unavailable.
    pub fn is_degraded(&self) -> bool {
        self.phase == MeetingPhase::Connected && !(self.media_connected && self.presence_connected)
    }
}

/// Format as `mm:ss`. Minutes keep counting past 59.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Thread-safe handle for sharing meeting state between the orchestrator and API handlers.
#[derive(Clone, Default)]
pub struct MeetingStatusHandle {
    inner: Arc<Mutex<MeetingState>>,
}

impl MeetingStatusHandle {
    pub async fn get(&self) -> MeetingState {
        self.inner.lock().await.clone()
    }

    pub async fn begin_join(&self, session_id: &str, title: &str) {
        let mut state = self.inner.lock().await;
        *state = MeetingState {
            session_id: Some(session_id.to_string()),
            title: Some(title.to_string()),
            ..MeetingState::default()
        };
    }

    /// Enter `Connected` and start the clock.
    pub async fn set_connected(&self, media_connected: bool, presence_connected: bool) {
        let mut state = self.inner.lock().await;
        state.phase = MeetingPhase::Connected;
        state.connected_at = Some(Instant::now());
        state.media_connected = media_connected;
        state.presence_connected = presence_connected;
    }

    pub async fn set_media_connected(&self, connected: bool) {
        self.inner.lock().await.media_connected = connected;
    }

    pub async fn set_presence_connected(&self, connected: bool) {
        self.inner.lock().await.presence_connected = connected;
    }

    pub async fn set_phase(&self, phase: MeetingPhase) {
        let mut state = self.inner.lock().await;
        state.phase = phase;
        if phase == MeetingPhase::Ended && state.ended_at.is_none() {
            state.ended_at = Some(Instant::now());
        }
    }

    pub async fn add_notice(&self, notice: String) {
        let mut state = self.inner.lock().await;
        push_notice(&mut state, notice);
    }

    /// Record an error without changing the phase.
    pub async fn set_error(&self, error: String) {
        let mut state = self.inner.lock().await;
        push_notice(&mut state, error.clone());
        state.last_error = Some(error);
    }
}

fn push_notice(state: &mut MeetingState, notice: String) {
    if state.notices.len() == MAX_NOTICES {
        state.notices.pop_front();
    }
    state.notices.push_back(notice);
}
