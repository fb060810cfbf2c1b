pub mod channel;
pub mod error;
pub mod guard;
pub mod health;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Build the API router.
///
/// `/v1/health` is public; every channel route checks the admin token
/// through [`guard::AdminGuard`].
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/health", get(health::health))
        .route(
            "/v1/channel",
            get(channel::get_status)
                .post(channel::connect)
                .delete(channel::disconnect),
        )
        .route("/v1/channel/health", get(channel::health))
        .route("/v1/channel/messages", post(channel::send_message))
        .route("/v1/channel/credentials", delete(channel::clear_credentials))
}
