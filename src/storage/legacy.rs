// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Legacy unencrypted key-value store.
//!
//! Older installs kept every entry, PHI included, as plaintext strings in a
//! flat key-value file. The migration coordinator drains it into the tiered
//! store once; nothing else reads it.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum LegacyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("legacy store is not a JSON object of strings: {0}")]
    Format(#[from] serde_json::Error),

    #[error("legacy store unavailable: {0}")]
    Unavailable(String),
}

pub type LegacyResult<T> = Result<T, LegacyError>;

/// Read/remove access to the legacy store.
pub trait LegacyStore: Send + Sync {
    /// Every key currently present.
    fn keys(&self) -> LegacyResult<Vec<String>>;

    fn get(&self, key: &str) -> LegacyResult<Option<String>>;

    /// Remove one key. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> LegacyResult<()>;
}

// =============================================================================
// File-backed store
// =============================================================================

/// Single JSON object file (`{"key": "value", ...}`), rewritten atomically
/// on every removal. A missing file is an empty store.
pub struct FileLegacyStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileLegacyStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> LegacyResult<BTreeMap<String, String>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> LegacyResult<()> {
        if entries.is_empty() {
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            debug!(path = %self.path.display(), "Legacy store drained");
            return Ok(());
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(entries)?;
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl LegacyStore for FileLegacyStore {
    fn keys(&self) -> LegacyResult<Vec<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.load()?.into_keys().collect())
    }

    fn get(&self, key: &str) -> LegacyResult<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.load()?.remove(key))
    }

    fn remove(&self, key: &str) -> LegacyResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.load()?;
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// In-memory legacy store with per-key failure injection.
#[derive(Default)]
pub struct MemoryLegacyStore {
    entries: Mutex<BTreeMap<String, String>>,
    failing_reads: Mutex<Vec<String>>,
    failing_removes: Mutex<Vec<String>>,
}

impl MemoryLegacyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        {
            let mut map = store.entries.lock().unwrap_or_else(|e| e.into_inner());
            for (k, v) in entries {
                map.insert(k.into(), v.into());
            }
        }
        store
    }

    /// Make reads of `key` fail until cleared.
    pub fn fail_reads_of(&self, key: &str) {
        self.failing_reads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(key.to_string());
    }

    /// Make removals of `key` fail until cleared.
    pub fn fail_removes_of(&self, key: &str) {
        self.failing_removes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(key.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_reads.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.failing_removes.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LegacyStore for MemoryLegacyStore {
    fn keys(&self) -> LegacyResult<Vec<String>> {
        let map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(map.keys().cloned().collect())
    }

    fn get(&self, key: &str) -> LegacyResult<Option<String>> {
        let failing = self.failing_reads.lock().unwrap_or_else(|e| e.into_inner());
        if failing.iter().any(|k| k == key) {
            return Err(LegacyError::Unavailable(format!("read of {key} failed")));
        }
        drop(failing);
        let map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(key).cloned())
    }

    fn remove(&self, key: &str) -> LegacyResult<()> {
        let failing = self.failing_removes.lock().unwrap_or_else(|e| e.into_inner());
        if failing.iter().any(|k| k == key) {
            return Err(LegacyError::Unavailable(format!("remove of {key} failed")));
        }
        drop(failing);
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}
