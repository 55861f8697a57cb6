//! Local control API for a running meeting.
//!
//! Provides HTTP endpoints for:
//! - Meeting status (merged view of media and presence)
//! - Microphone, camera and screen share toggles
//! - Chat
//! - Invite link
//! - Leaving the meeting

pub mod error;
pub mod routes;

use crate::config::Config;
use crate::meeting::MeetingStatusHandle;
use anyhow::Result;
use axum::Router;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tracing::info;

pub use routes::session::{ApiCommand, Reply, SessionState};

pub struct ApiServer {
    port: u16,
    state: SessionState,
}

impl ApiServer {
    pub fn new(tx: mpsc::Sender<ApiCommand>, status: MeetingStatusHandle, config: &Config) -> Self {
        Self {
            port: config.api.port,
            state: SessionState { tx, status },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .merge(routes::session::router(self.state.clone()))
            .merge(routes::chat::router(self.state.clone()))
            .merge(routes::invite::router(self.state.clone()))
            .layer(ServiceBuilder::new())
    }

    pub async fn start(self) -> Result<()> {
        let app = self.router();

        let listener = tokio::net::TcpListener::bind(&format!("127.0.0.1:{}", self.port)).await?;

        info!("API server listening on http://127.0.0.1:{}", self.port);
        info!("Endpoints:");
        info!("  GET  /              - Service info");
        info!("  GET  /status        - Meeting view");
        info!("  POST /mic/toggle    - Toggle microphone");
        info!("  POST /camera/toggle - Toggle camera");
        info!("  POST /screen/toggle - Toggle screen share");
        info!("  GET  /chat          - List chat messages");
        info!("  POST /chat          - Send chat message");
        info!("  GET  /invite        - Copy invite link");
        info!("  POST /leave         - Leave the meeting");

        axum::serve(listener, app).await?;

        Ok(())
    }
}
