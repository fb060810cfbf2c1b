//! Maps channel errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use fl_channel::ChannelError;

/// A [`ChannelError`] on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub ChannelError);

impl From<ChannelError> for ApiError {
    fn from(e: ChannelError) -> Self {
        Self(e)
    }
}

pub fn status_for(error: &ChannelError) -> StatusCode {
    if error.is_caller_error() {
        return StatusCode::BAD_REQUEST;
    }
    match error {
        ChannelError::SessionLoggedOut(_) => StatusCode::CONFLICT,
        ChannelError::ConnectionTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ChannelError::MaxRetriesExceeded(_) | ChannelError::SendFailed { .. } => {
            StatusCode::BAD_GATEWAY
        }
        ChannelError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::warn!(kind = self.0.kind(), error = %self.0, "channel request failed");
        }
        (
            status,
            Json(serde_json::json!({
                "error": self.0.to_string(),
                "kind": self.0.kind(),
            })),
        )
            .into_response()
    }
}
