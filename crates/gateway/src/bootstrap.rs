//! Build the shared application state from config.

use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};

use fl_channel::{
    BridgeTransport, ConnectionSupervisor, FileCredentialStore, SupervisorBuilder,
};
use fl_domain::config::Config;

use crate::display::TerminalPairingDisplay;
use crate::state::AppState;

/// Wire the channel supervisor to the bridge transport and the on-disk
/// credential store.
pub fn build_supervisor(config: &Config) -> anyhow::Result<ConnectionSupervisor> {
    let store = FileCredentialStore::new(&config.credentials.dir).with_context(|| {
        format!(
            "preparing credentials directory {}",
            config.credentials.dir.display()
        )
    })?;
    tracing::info!(path = %store.path().display(), "credential store ready");

    let transport = BridgeTransport::new(config.bridge.clone());
    tracing::info!(url = %config.bridge.url, "bridge transport configured");

    Ok(SupervisorBuilder::new(Arc::new(transport))
        .credential_store(Arc::new(store))
        .pairing_display(Arc::new(TerminalPairingDisplay))
        .configure(&config.channel)
        .build())
}

pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let channel = build_supervisor(&config)?;
    let admin_token_hash = admin_token_hash(&config.admin.token_env);
    Ok(AppState {
        config,
        channel,
        admin_token_hash,
    })
}

/// Read the admin token once and keep only its SHA-256, for
/// constant-time comparison in the guard.
fn admin_token_hash(env_var: &str) -> Option<Vec<u8>> {
    match std::env::var(env_var).ok().filter(|t| !t.is_empty()) {
        Some(token) => {
            tracing::info!(source = %format!("env:{env_var}"), "admin bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        None => {
            tracing::warn!("admin bearer-token auth DISABLED: set the {env_var} env var");
            None
        }
    }
}

/// Connect in the background at boot so the first caller finds a ready
/// session (or a pairing code in `GET /v1/channel`).
pub fn spawn_background_tasks(state: &AppState) {
    if !state.config.channel.connect_on_startup {
        tracing::info!("connect_on_startup disabled, channel connects on first use");
        return;
    }

    let channel = state.channel.clone();
    tokio::spawn(async move {
        match channel.acquire().await {
            Ok(session) => tracing::info!(
                session_id = %session.id(),
                account = ?session.identity().map(|i| i.id),
                "channel connected at startup"
            ),
            Err(e) => tracing::warn!(error = %e, kind = e.kind(), "startup connect failed"),
        }
    });
}
