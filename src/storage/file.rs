//! File-backed key-value store
//!
//! All keys live in a single JSON document. Writes go through a temporary
//! file and a rename, so a crash mid-write leaves the previous document
//! intact instead of a truncated one.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::KvStore;
use crate::error::{DetourError, Result};

pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
    // Writers serialize here so concurrent temp-file writes cannot
    // interleave under the same rename target.
    write_gate: tokio::sync::Mutex<()>,
}

impl FileStore {
    /// Open a store at `path`, loading any existing document
    ///
    /// A missing file is an empty store. A corrupt document is logged and
    /// treated as empty rather than refusing to start.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<HashMap<String, String>>(&raw) {
                Ok(map) => {
                    debug!(path = %path.display(), keys = map.len(), "Loaded store document");
                    map
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Store document is corrupt, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(DetourError::Storage(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
            write_gate: tokio::sync::Mutex::new(()),
        })
    }

    async fn persist(&self) -> Result<()> {
        let _gate = self.write_gate.lock().await;

        let snapshot = self.entries.lock().clone();
        let raw = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, raw.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        self.persist().await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let removed = self.entries.lock().remove(key).is_some();
        if removed {
            self.persist().await?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().keys().cloned().collect())
    }
}
