//! Session control endpoints.
//!
//! Provides HTTP endpoints for:
//! - Service info (GET /)
//! - Merged meeting view (GET /status)
//! - Device toggles (POST /mic/toggle, /camera/toggle, /screen/toggle)
//! - Leaving the meeting (POST /leave)

use crate::controls::DeviceState;
use crate::error::MeetingResult;
use crate::meeting::{InviteCopy, LeaveSummary, MeetingStatusHandle, MeetingView};
use crate::presence::ChatMessage;
use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::api::error::{ApiError, ApiResult};

pub type Reply<T> = oneshot::Sender<MeetingResult<T>>;

/// Requests handled by the session loop that owns the meeting.
pub enum ApiCommand {
    View(oneshot::Sender<MeetingView>),
    ToggleMicrophone(Reply<DeviceState>),
    ToggleCamera(Reply<DeviceState>),
    ToggleScreenShare(Reply<DeviceState>),
    Messages(oneshot::Sender<Vec<ChatMessage>>),
    SendChat { text: String, reply: Reply<bool> },
    CopyInvite(Reply<InviteCopy>),
    Leave(Reply<LeaveSummary>),
}

#[derive(Clone)]
pub struct SessionState {
    pub tx: mpsc::Sender<ApiCommand>,
    pub status: MeetingStatusHandle,
}

impl SessionState {
    /// Send a command to the session loop and wait for its reply.
    pub async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> ApiCommand,
    ) -> ApiResult<T> {
        let (reply, rx) = oneshot::channel();
        if let Err(e) = self.tx.send(command(reply)).await {
            error!("Failed to send session command: {}", e);
            return Err(ApiError::unavailable("meeting session is not running"));
        }
        rx.await
            .map_err(|_| ApiError::unavailable("meeting session ended before replying"))
    }
}

pub fn router(state: SessionState) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/status", get(meeting_status))
        .route("/mic/toggle", post(toggle_microphone))
        .route("/camera/toggle", post(toggle_camera))
        .route("/screen/toggle", post(toggle_screen_share))
        .route("/leave", post(leave_meeting))
        .with_state(state)
}

/// Service info plus the current phase, answered without the session loop.
async fn service_info(State(state): State<SessionState>) -> Json<Value> {
    let status = state.status.get().await;
    Json(json!({
        "service": "classmeet",
        "version": env!("CARGO_PKG_VERSION"),
        "phase": status.phase.as_str(),
        "session_id": status.session_id,
        "duration": status.duration_label(),
    }))
}

async fn meeting_status(State(state): State<SessionState>) -> ApiResult<Json<MeetingView>> {
    Ok(Json(state.request(ApiCommand::View).await?))
}

async fn toggle_microphone(State(state): State<SessionState>) -> ApiResult<Json<DeviceState>> {
    info!("Microphone toggle received via API");
    Ok(Json(state.request(ApiCommand::ToggleMicrophone).await??))
}

async fn toggle_camera(State(state): State<SessionState>) -> ApiResult<Json<DeviceState>> {
    info!("Camera toggle received via API");
    Ok(Json(state.request(ApiCommand::ToggleCamera).await??))
}

async fn toggle_screen_share(State(state): State<SessionState>) -> ApiResult<Json<DeviceState>> {
    info!("Screen share toggle received via API");
    Ok(Json(state.request(ApiCommand::ToggleScreenShare).await??))
}

async fn leave_meeting(State(state): State<SessionState>) -> ApiResult<Json<LeaveSummary>> {
    info!("Leave received via API");
    Ok(Json(state.request(ApiCommand::Leave).await??))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MeetingError;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    /// Stand-in session loop answering toggles from a fixed device state.
    fn spawn_loop(mut rx: mpsc::Receiver<ApiCommand>) {
        tokio::spawn(async move {
            let mut device = DeviceState::default();
            while let Some(command) = rx.recv().await {
                match command {
                    ApiCommand::ToggleMicrophone(reply) => {
                        device.is_muted = !device.is_muted;
                        let _ = reply.send(Ok(device));
                    }
                    ApiCommand::ToggleScreenShare(reply) => {
                        let _ = reply.send(Err(MeetingError::ScreenShare("denied".into())));
                    }
                    ApiCommand::Leave(reply) => {
                        let _ = reply.send(Err(MeetingError::InvalidState(
                            "meeting already ended".into(),
                        )));
                    }
                    _ => {}
                }
            }
        });
    }

    fn app() -> Router {
        let (tx, rx) = mpsc::channel(8);
        spawn_loop(rx);
        router(SessionState {
            tx,
            status: MeetingStatusHandle::default(),
        })
    }

    async fn post_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_toggle_returns_device_state() {
        let (status, body) = post_json(app(), "/mic/toggle").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isMuted"], true);
    }

    #[tokio::test]
    async fn test_screen_share_failure_is_unprocessable() {
        let (status, body) = post_json(app(), "/screen/toggle").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], true);
    }

    #[tokio::test]
    async fn test_leave_twice_conflicts() {
        let (status, _) = post_json(app(), "/leave").await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_stopped_loop_is_unavailable() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let app = router(SessionState {
            tx,
            status: MeetingStatusHandle::default(),
        });
        let (status, _) = post_json(app, "/camera/toggle").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_service_info_reads_phase() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["service"], "classmeet");
        assert_eq!(body["phase"], "joining");
    }
}
