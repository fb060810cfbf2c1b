use anyhow::Context;

use fl_channel::{CredentialStore, FileCredentialStore};
use fl_domain::config::Config;

/// Remove the stored pairing material.  Run it while the gateway is
/// stopped; a running gateway should use `DELETE /v1/channel/credentials`
/// instead so its logged-out latch is released too.
pub async fn clear(config: &Config) -> anyhow::Result<()> {
    let store = FileCredentialStore::new(&config.credentials.dir)
        .with_context(|| format!("opening {}", config.credentials.dir.display()))?;
    store
        .clear()
        .await
        .with_context(|| format!("removing {}", store.path().display()))?;
    println!("Credentials cleared ({})", store.path().display());
    Ok(())
}
