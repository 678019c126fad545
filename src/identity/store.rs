//! Key/value persistence for the session identity.
//!
//! Two stores are provided:
//! - [`MemoryStore`]: process-local map, for hosts without persistence and
//!   for tests.
//! - [`FileStore`]: a small JSON document on disk with per-entry expiry,
//!   rewritten atomically (temp file + rename) on every `set`.

use crate::clock::{Clock, SystemClock};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Minimal persistence contract used once at startup.
pub trait KeyValueStore: Send + Sync {
    /// Fetch a value. `Ok(None)` when absent or expired.
    fn get(&self, key: &str) -> Result<Option<String>, String>;

    /// Store a value, optionally expiring after `ttl`.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), String>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct StoredEntry {
    value: String,
    /// Absolute expiry (ms since epoch); `None` never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at_ms: Option<u64>,
}

impl StoredEntry {
    fn new(value: &str, ttl: Option<Duration>, now_ms: u64) -> Self {
        Self {
            value: value.to_string(),
            expires_at_ms: ttl.map(|ttl| now_ms.saturating_add(ttl.as_millis() as u64)),
        }
    }

    fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at_ms.map_or(true, |at| now_ms < at)
    }
}

// ================================================================================================
// MEMORY STORE
// ================================================================================================

/// In-memory store with expiry.
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, StoredEntry>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            clock,
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, String> {
        let now = self.clock.now_ms();
        Ok(self
            .entries
            .read()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), String> {
        let entry = StoredEntry::new(value, ttl, self.clock.now_ms());
        self.entries.write().insert(key.to_string(), entry);
        Ok(())
    }
}

// ================================================================================================
// FILE STORE
// ================================================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    entries: BTreeMap<String, StoredEntry>,
}

/// JSON-file backed store.
pub struct FileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").field("path", &self.path).finish()
    }
}

impl FileStore {
    /// Open a store at `path`. The file itself is created on first `set`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock<P: AsRef<Path>>(path: P, clock: Arc<dyn Clock>) -> Result<Self, String> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create store directory: {}", e))?;
            }
        }

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            clock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StoreDocument, String> {
        if !self.path.exists() {
            return Ok(StoreDocument::default());
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| format!("Failed to read store: {}", e))?;
        if content.trim().is_empty() {
            return Ok(StoreDocument::default());
        }

        serde_json::from_str(&content).map_err(|e| format!("Failed to parse store: {}", e))
    }

    fn save(&self, doc: &StoreDocument) -> Result<(), String> {
        let json = serde_json::to_vec_pretty(doc)
            .map_err(|e| format!("Failed to serialize store: {}", e))?;

        let tmp_path = self.path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| format!("Create temp failed: {}", e))?;
        file.write_all(&json)
            .map_err(|e| format!("Write store failed: {}", e))?;
        file.sync_all().map_err(|e| format!("Sync failed: {}", e))?;
        drop(file);

        fs::rename(&tmp_path, &self.path).map_err(|e| format!("Rename failed: {}", e))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, String> {
        let now = self.clock.now_ms();
        let doc = self.load()?;
        Ok(doc
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), String> {
        let _guard = self.write_lock.lock();
        let now = self.clock.now_ms();

        // A corrupt document is replaced rather than blocking the write
        let mut doc = self.load().unwrap_or_default();
        doc.entries.retain(|_, entry| entry.is_live(now));
        doc.entries
            .insert(key.to_string(), StoredEntry::new(value, ttl, now));

        self.save(&doc)
    }
}
