//! Chat endpoints (GET /chat, POST /chat).

use crate::presence::ChatMessage;
use axum::{extract::State, response::Json, routing::get, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::session::{ApiCommand, SessionState};
use crate::api::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

pub fn router(state: SessionState) -> Router {
    Router::new()
        .route("/chat", get(list_messages).post(send_message))
        .with_state(state)
}

async fn list_messages(State(state): State<SessionState>) -> ApiResult<Json<Vec<ChatMessage>>> {
    Ok(Json(state.request(ApiCommand::Messages).await?))
}

/// Blank text is accepted and reported as `"sent": false`.
async fn send_message(
    State(state): State<SessionState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<Value>> {
    debug!("Chat message received via API ({} chars)", request.text.len());
    let text = request.text;
    let sent = state
        .request(|reply| ApiCommand::SendChat { text, reply })
        .await??;
    Ok(Json(json!({ "sent": sent })))
}
