//! Persisted transfer state.
//!
//! The resume offset survives process restarts through an injected
//! key-value [`StateStore`]. Reads and writes are not transactional; the
//! last writer wins.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Sentinel meaning "no resumable state".
pub const NOT_SET: i64 = -1;

pub const KEY_BYTES_DONE: &str = "download_bytes_done";
pub const KEY_TOTAL_BYTES: &str = "download_total_bytes";
pub const KEY_UPDATED_AT: &str = "download_updated_at";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferState {
    pub bytes_done: i64,
    pub total_bytes: i64,
}

impl TransferState {
    pub const fn empty() -> Self {
        Self {
            bytes_done: NOT_SET,
            total_bytes: NOT_SET,
        }
    }

    pub fn is_resumable(&self) -> bool {
        self.bytes_done != NOT_SET
    }
}

impl Default for TransferState {
    fn default() -> Self {
        Self::empty()
    }
}

pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> io::Result<Option<i64>>;
    fn put(&self, key: &str, value: i64) -> io::Result<()>;
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// In-process store. Clones share the same map.
#[derive(Clone, Default, Debug)]
pub struct MemoryStore {
    values: Arc<Mutex<HashMap<String, i64>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, i64>> {
        // a poisoned map is still a valid map
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> io::Result<Option<i64>> {
        Ok(self.lock().get(key).copied())
    }

    fn put(&self, key: &str, value: i64) -> io::Result<()> {
        self.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

/// Flat JSON object kept next to the partial file (`<name>.part.json`).
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the whole map. Missing or corrupt files read as empty.
    pub fn read_all(&self) -> HashMap<String, i64> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring corrupt state file");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        }
    }

    fn write_all(&self, values: &HashMap<String, i64>) -> io::Result<()> {
        if values.is_empty() {
            return match std::fs::remove_file(&self.path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            };
        }
        let content = serde_json::to_string(values).map_err(io::Error::other)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)
    }
}

impl StateStore for JsonFileStore {
    fn get(&self, key: &str) -> io::Result<Option<i64>> {
        Ok(self.read_all().get(key).copied())
    }

    fn put(&self, key: &str, value: i64) -> io::Result<()> {
        let mut values = self.read_all();
        values.insert(key.to_string(), value);
        self.write_all(&values)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        let mut values = self.read_all();
        if values.remove(key).is_some() {
            self.write_all(&values)?;
        }
        Ok(())
    }
}

/// Typed view over a [`StateStore`], scoped to one worker.
pub struct TransferTracker<S> {
    store: S,
}

impl<S: StateStore> TransferTracker<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn load(&self) -> io::Result<TransferState> {
        Ok(TransferState {
            bytes_done: self.store.get(KEY_BYTES_DONE)?.unwrap_or(NOT_SET),
            total_bytes: self.store.get(KEY_TOTAL_BYTES)?.unwrap_or(NOT_SET),
        })
    }

    pub fn save(&self, state: &TransferState) -> io::Result<()> {
        self.store.put(KEY_BYTES_DONE, state.bytes_done)?;
        self.store.put(KEY_TOTAL_BYTES, state.total_bytes)?;
        self.store.put(KEY_UPDATED_AT, Utc::now().timestamp())
    }

    pub fn clear(&self) -> io::Result<()> {
        self.store.remove(KEY_BYTES_DONE)?;
        self.store.remove(KEY_TOTAL_BYTES)?;
        self.store.remove(KEY_UPDATED_AT)
    }
}
