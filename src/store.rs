//! Connection Store
//!
//! Durable home of the [`ConnectionRecord`]. The coordinator writes it when a
//! handshake succeeds and deletes it on teardown or remote revocation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use thiserror::Error;
use tracing::{debug, warn};

use crate::network::session::ConnectionRecord;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// In-memory store lock poisoned.
    #[error("store lock poisoned")]
    Poisoned,
}

/// Durable record of the active session.
pub trait ConnectionStore: Send + Sync {
    /// Current record, if any.
    fn read(&self) -> Option<ConnectionRecord>;

    /// Replace the record.
    fn write(&self, record: &ConnectionRecord) -> Result<(), StoreError>;

    /// Remove the record. Removing a missing record succeeds.
    fn delete(&self) -> Result<(), StoreError>;
}

// =============================================================================
// FILE STORE
// =============================================================================

/// Record kept as a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ConnectionStore for JsonFileStore {
    fn read(&self) -> Option<ConnectionRecord> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&text) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Ignoring malformed connection record {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn write(&self, record: &ConnectionRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(record)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        // Write then rename so a crash never leaves a truncated record.
        let temp = self.temp_path();
        std::fs::write(&temp, json)?;
        std::fs::rename(&temp, &self.path)?;

        debug!("Saved connection record to {}", self.path.display());
        Ok(())
    }

    fn delete(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// In-memory store with switchable write failure.
#[derive(Debug, Default)]
pub struct MemoryStore {
    record: Mutex<Option<ConnectionRecord>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
    deletes: AtomicUsize,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `record`.
    pub fn with_record(record: ConnectionRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            ..Default::default()
        }
    }

    /// Make subsequent writes fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Deletes so far.
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

impl ConnectionStore for MemoryStore {
    fn read(&self) -> Option<ConnectionRecord> {
        self.record.lock().ok().and_then(|record| record.clone())
    }

    fn write(&self, record: &ConnectionRecord) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "write disabled").into());
        }
        let mut slot = self.record.lock().map_err(|_| StoreError::Poisoned)?;
        *slot = Some(record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self) -> Result<(), StoreError> {
        let mut slot = self.record.lock().map_err(|_| StoreError::Poisoned)?;
        *slot = None;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::session::{ChannelSubscription, Protocol};

    fn sample_record() -> ConnectionRecord {
        ConnectionRecord {
            protocol: Protocol::Websocket,
            id: Some("42".into()),
            token: Some("abc123".into()),
            ip: None,
            channels: vec![ChannelSubscription {
                id: "c1".into(),
                types: vec!["chat".into()],
            }],
            required_role_to_join: None,
        }
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("connection.json"));

        assert!(store.read().is_none());
        store.write(&sample_record()).unwrap();
        assert_eq!(store.read(), Some(sample_record()));

        store.delete().unwrap();
        assert!(store.read().is_none());
    }

    #[test]
    fn test_file_store_delete_missing_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("absent.json"));
        assert!(store.delete().is_ok());
    }

    #[test]
    fn test_file_store_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/deeper/connection.json"));
        store.write(&sample_record()).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_file_store_malformed_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connection.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(path);
        assert!(store.read().is_none());
    }

    #[test]
    fn test_file_store_write_failure_is_io() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file, not a directory").unwrap();

        let store = JsonFileStore::new(blocker.join("connection.json"));
        let result = store.write(&sample_record());
        assert!(matches!(result, Err(StoreError::Io(_))));
    }

    #[test]
    fn test_memory_store_fail_writes() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(matches!(store.write(&sample_record()), Err(StoreError::Io(_))));
        assert!(store.read().is_none());

        store.set_fail_writes(false);
        store.write(&sample_record()).unwrap();
        assert_eq!(store.write_count(), 1);
        assert!(store.read().is_some());

        store.delete().unwrap();
        assert_eq!(store.delete_count(), 1);
        assert!(store.read().is_none());
    }
}
