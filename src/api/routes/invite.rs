//! Invite endpoint (GET /invite).

use crate::meeting::InviteCopy;
use axum::{extract::State, response::Json, routing::get, Router};

use super::session::{ApiCommand, SessionState};
use crate::api::error::ApiResult;

pub fn router(state: SessionState) -> Router {
    Router::new()
        .route("/invite", get(invite_link))
        .with_state(state)
}

/// Copies the invite link on the service host and returns it either way.
async fn invite_link(State(state): State<SessionState>) -> ApiResult<Json<InviteCopy>> {
    Ok(Json(state.request(ApiCommand::CopyInvite).await??))
}
