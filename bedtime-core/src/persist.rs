//! Name registry persistence.
//!
//! Stories themselves are never saved; only the set of names already used,
//! so a restarted process keeps avoiding them.

use crate::names::NameRegistry;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::fs;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current save file version.
const SAVE_VERSION: u32 = 1;

/// A saved name registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedRegistry {
    /// Save format version for compatibility checking.
    pub version: u32,

    /// When the save was created (RFC 3339).
    pub saved_at: String,

    /// Registered names, oldest first.
    pub names: Vec<String>,
}

impl SavedRegistry {
    /// Snapshot a registry.
    pub fn from_registry(registry: &NameRegistry) -> Self {
        Self {
            version: SAVE_VERSION,
            saved_at: chrono::Utc::now().to_rfc3339(),
            names: registry.names(),
        }
    }

    /// Register every saved name. Returns how many were new.
    pub fn restore_into(&self, registry: &NameRegistry) -> usize {
        registry.insert_all(&self.names)
    }

    /// Save to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        let saved: Self = serde_json::from_str(&content)?;

        if saved.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: saved.version,
            });
        }

        Ok(saved)
    }
}

/// Load `path` into `registry` if the file exists. A missing file is not an
/// error: it just means nothing was saved yet.
pub async fn load_registry(
    registry: &NameRegistry,
    path: impl AsRef<Path>,
) -> Result<usize, PersistError> {
    let path = path.as_ref();
    if !fs::try_exists(path).await? {
        return Ok(0);
    }
    let saved = SavedRegistry::load_json(path).await?;
    Ok(saved.restore_into(registry))
}

/// Save `registry` to `path`.
pub async fn save_registry(
    registry: &NameRegistry,
    path: impl AsRef<Path>,
) -> Result<(), PersistError> {
    SavedRegistry::from_registry(registry).save_json(path).await
}
