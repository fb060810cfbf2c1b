use std::sync::Arc;

use fl_channel::ConnectionSupervisor;
use fl_domain::config::Config;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// The one channel connection this process owns.
    pub channel: ConnectionSupervisor,
    /// SHA-256 of the admin bearer token; `None` in dev mode.
    pub admin_token_hash: Option<Vec<u8>>,
}
