//! Persisted pairing material and the store it lives in.
//!
//! The material is opaque to us: the transport hands it over on every
//! rotation and gets it back on the next `open`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use fl_domain::error::{Error, Result};

/// Opaque credential material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(pub serde_json::Value);

/// Where credential material is kept between process runs.
#[async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    async fn load(&self) -> Result<Option<Credentials>>;
    async fn save(&self, material: &Credentials) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Credential store backed by `<dir>/creds.json`.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join("creds.json"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<Credentials>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => {
                let material = serde_json::from_str(&raw).map_err(|e| {
                    Error::Credentials(format!("{} is not valid JSON: {e}", self.path.display()))
                })?;
                Ok(Some(material))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn save(&self, material: &Credentials) -> Result<()> {
        let json = serde_json::to_vec_pretty(material)?;
        // Write-then-rename so a crash never leaves half a file behind.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-local store; the pairing is lost on restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    material: SyncMutex<Option<Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_material(material: Credentials) -> Self {
        Self {
            material: SyncMutex::new(Some(material)),
        }
    }

    pub fn snapshot(&self) -> Option<Credentials> {
        self.material.lock().clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<Credentials>> {
        Ok(self.material.lock().clone())
    }

    async fn save(&self, material: &Credentials) -> Result<()> {
        *self.material.lock() = Some(material.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.material.lock() = None;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Serialized access
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serializes all store access and fences saves across a `clear`.
///
/// Every load hands out the current generation.  `clear` bumps it, and a
/// save carrying an older generation is dropped, so a session that was
/// alive when the operator reset the pairing cannot write its stale
/// material back.
pub struct CredentialGate {
    store: Arc<dyn CredentialStore>,
    generation: Mutex<u64>,
}

/// Result of [`CredentialGate::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// A `clear` happened after this generation was loaded.
    Stale,
}

impl CredentialGate {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            generation: Mutex::new(0),
        }
    }

    pub async fn load(&self) -> Result<(Option<Credentials>, u64)> {
        let generation = self.generation.lock().await;
        let material = self.store.load().await?;
        Ok((material, *generation))
    }

    pub async fn save(&self, material: &Credentials, loaded_at: u64) -> Result<SaveOutcome> {
        let generation = self.generation.lock().await;
        if *generation != loaded_at {
            return Ok(SaveOutcome::Stale);
        }
        self.store.save(material).await?;
        Ok(SaveOutcome::Saved)
    }

    pub async fn clear(&self) -> Result<()> {
        let mut generation = self.generation.lock().await;
        self.store.clear().await?;
        *generation += 1;
        Ok(())
    }
}
