//! Channel endpoints: status, connect, disconnect, send, credential reset.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use serde::Deserialize;

use crate::state::AppState;

use super::error::ApiError;
use super::guard::AdminGuard;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/channel — full supervisor status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_status(_guard: AdminGuard, State(state): State<AppState>) -> impl IntoResponse {
    Json(state.channel.status())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/channel — connect (or return the live session)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn connect(
    _guard: AdminGuard,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.channel.acquire().await?;
    Ok(Json(serde_json::json!({
        "connected": true,
        "session_id": session.id(),
        "connected_since": session.connected_since(),
        "user": session.identity(),
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/channel — log out and drop the session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn disconnect(_guard: AdminGuard, State(state): State<AppState>) -> impl IntoResponse {
    state.channel.disconnect().await;
    Json(serde_json::json!({ "disconnected": true }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/channel/health — connected flag with a readable message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn health(_guard: AdminGuard, State(state): State<AppState>) -> impl IntoResponse {
    let connected = state.channel.is_healthy();
    Json(serde_json::json!({
        "connected": connected,
        "message": if connected { "channel is connected" } else { "channel is not connected" },
        "timestamp": Utc::now(),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/channel/messages — send one text message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub to: String,
    pub message: String,
}

pub async fn send_message(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let receipt = state.channel.send_message(&body.to, &body.message).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message_id": receipt.message_id,
        "recipient": receipt.recipient,
        "sent_at": receipt.sent_at,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/channel/credentials — forget the pairing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn clear_credentials(
    _guard: AdminGuard,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    state.channel.clear_credentials().await?;
    Ok(Json(serde_json::json!({ "cleared": true })))
}
