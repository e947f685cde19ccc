//! Durable per-device credential storage.
//!
//! The file is a single JSON object keyed by device identifier, each value
//! mapping a protocol name to the credential blob that protocol produced:
//!
//! ```json
//! {
//!   "AA:BB:CC:DD:EE:FF": { "Companion": "c2VjcmV0..." }
//! }
//! ```
//!
//! Every mutation rewrites the whole file before returning.  Writes go to a
//! sibling temp file which is renamed over the target, so a crash mid-write
//! leaves the previous contents intact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use atv_core::{DeviceId, Protocol, RemoteError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// `DeviceId -> (protocol name -> credential blob)`.
pub type CredentialRecord = BTreeMap<DeviceId, BTreeMap<String, String>>;

/// Store shared between the pairing coordinator and the connection registry.
pub type SharedCredentialStore = Arc<tokio::sync::Mutex<CredentialStore>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error accessing credentials at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize credentials: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<StoreError> for RemoteError {
    fn from(e: StoreError) -> Self {
        RemoteError::PersistenceFailed(e.to_string())
    }
}

/// In-memory credential record backed by one JSON file.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    record: CredentialRecord,
}

impl CredentialStore {
    /// Opens the store at `path`, migrating from `legacy` first when the
    /// canonical file does not exist yet or is empty.
    ///
    /// Never fails: a failed migration is logged, and an unreadable or
    /// malformed file yields an empty record.
    pub fn open(path: impl Into<PathBuf>, legacy: Option<&Path>) -> Self {
        let path = path.into();
        if let Some(legacy) = legacy {
            migrate_legacy(legacy, &path);
        }
        let record = load(&path);
        Self { path, record }
    }

    /// Wraps the store for sharing across components.
    pub fn shared(self) -> SharedCredentialStore {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: &DeviceId) -> Option<&BTreeMap<String, String>> {
        self.record.get(id)
    }

    /// A device is paired when at least one protocol credential is stored.
    pub fn is_paired(&self, id: &DeviceId) -> bool {
        self.record.get(id).is_some_and(|protocols| !protocols.is_empty())
    }

    pub fn len(&self) -> usize {
        self.record.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_empty()
    }

    /// Adds or replaces the credential for `(id, protocol)` and persists.
    ///
    /// On a failed save the in-memory record is restored to its previous
    /// state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the file cannot be written.
    pub fn upsert(
        &mut self,
        id: &DeviceId,
        protocol: Protocol,
        credentials: impl Into<String>,
    ) -> Result<(), StoreError> {
        let key = protocol.as_str().to_string();
        let entry = self.record.entry(id.clone()).or_default();
        let previous = entry.insert(key.clone(), credentials.into());

        if let Err(e) = self.save() {
            let entry = self.record.entry(id.clone()).or_default();
            match previous {
                Some(old) => {
                    entry.insert(key, old);
                }
                None => {
                    entry.remove(&key);
                    if entry.is_empty() {
                        self.record.remove(id);
                    }
                }
            }
            return Err(e);
        }

        info!(device = %id, protocol = %protocol, "credentials saved");
        Ok(())
    }

    /// Deletes every credential for `id` and persists.
    ///
    /// Returns `Ok(false)` without touching the file when nothing was stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the file cannot be written; the entry is
    /// restored in memory.
    pub fn remove(&mut self, id: &DeviceId) -> Result<bool, StoreError> {
        let Some(removed) = self.record.remove(id) else {
            return Ok(false);
        };
        if let Err(e) = self.save() {
            self.record.insert(id.clone(), removed);
            return Err(e);
        }
        info!(device = %id, "credentials removed");
        Ok(true)
    }

    /// Serializes the whole record to the canonical path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory, temp file, or rename
    /// fails.
    pub fn save(&self) -> Result<(), StoreError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StoreError::Io { path, source }
        };

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(io_err(dir))?;
        }

        let content = serde_json::to_string_pretty(&self.record)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(io_err(&tmp))?;
        std::fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;

        debug!(path = %self.path.display(), devices = self.record.len(), "credential file written");
        Ok(())
    }
}

fn migrate_legacy(legacy: &Path, canonical: &Path) {
    // A zero-length canonical file holds nothing worth keeping.
    let canonical_has_data = std::fs::metadata(canonical).is_ok_and(|m| m.len() > 0);
    if canonical_has_data || !legacy.exists() {
        return;
    }
    info!(from = %legacy.display(), to = %canonical.display(), "migrating credentials from legacy location");

    if let Some(dir) = canonical.parent() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("failed to create credential directory {}: {e}", dir.display());
            return;
        }
    }
    if let Err(e) = std::fs::copy(legacy, canonical) {
        warn!("failed to migrate credentials: {e}");
    }
}

fn load(path: &Path) -> CredentialRecord {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no credential file yet; it is created on first pairing");
            return CredentialRecord::new();
        }
        Err(e) => {
            warn!(path = %path.display(), "failed to read credentials: {e}");
            return CredentialRecord::new();
        }
    };

    match serde_json::from_str::<CredentialRecord>(&content) {
        Ok(record) => {
            info!(devices = record.len(), "loaded stored credentials");
            record
        }
        Err(e) => {
            warn!(path = %path.display(), "credential file is malformed, starting empty: {e}");
            CredentialRecord::new()
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
