// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LOCAL tier: fast unencrypted key-value storage.
//!
//! An LRU hot cache sits in front of a redb file (`local.redb`). Values are
//! stored as `[written_at_ms: u64 BE][payload]` so the retention sweeper can
//! expire entries without a second table. If the file cannot be opened the
//! tier runs memory-only for the life of the process.
//!
//! Writers commit to the backend first, then invalidate the cached key and
//! bump the cache version under the cache lock. A read fills the cache only
//! if the version is unchanged since it started, so a value read from a
//! snapshot older than a completed write is never cached.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;

use lru::LruCache;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::warn;

use super::record_db::DbResult;

const LOCAL_KV: TableDefinition<&str, &[u8]> = TableDefinition::new("local_kv");

const STAMP_LEN: usize = 8;

#[derive(Clone)]
struct Entry {
    written_at: i64,
    value: Vec<u8>,
}

enum Backend {
    Durable(Database),
    Volatile(Mutex<HashMap<String, Entry>>),
}

struct HotCache {
    entries: LruCache<String, Entry>,
    version: u64,
}

impl HotCache {
    fn new(capacity: usize) -> Mutex<Self> {
        Mutex::new(Self {
            entries: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            version: 0,
        })
    }

    fn invalidate<'a, I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.version = self.version.wrapping_add(1);
        for key in keys {
            self.entries.pop(key);
        }
    }
}

pub struct LocalTier {
    backend: Backend,
    hot: Mutex<HotCache>,
}

fn encode(entry: &Entry) -> Vec<u8> {
    let mut out = Vec::with_capacity(STAMP_LEN + entry.value.len());
    out.extend_from_slice(&(entry.written_at.max(0) as u64).to_be_bytes());
    out.extend_from_slice(&entry.value);
    out
}

fn decode(bytes: &[u8]) -> Option<Entry> {
    let stamp: [u8; STAMP_LEN] = bytes.get(..STAMP_LEN)?.try_into().ok()?;
    Some(Entry {
        written_at: u64::from_be_bytes(stamp) as i64,
        value: bytes[STAMP_LEN..].to_vec(),
    })
}

impl LocalTier {
    /// Open the tier at `path`, degrading to memory-only if that fails.
    pub fn open(path: &Path, capacity: usize) -> Self {
        let backend = match Self::open_db(path) {
            Ok(db) => Backend::Durable(db),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Local tier file unavailable, running memory-only");
                Backend::Volatile(Mutex::new(HashMap::new()))
            }
        };
        Self {
            backend,
            hot: HotCache::new(capacity),
        }
    }

    /// Memory-only tier.
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            backend: Backend::Volatile(Mutex::new(HashMap::new())),
            hot: HotCache::new(capacity),
        }
    }

    fn open_db(path: &Path) -> DbResult<Database> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(LOCAL_KV)?;
        }
        write_txn.commit()?;
        Ok(db)
    }

    /// Whether entries survive a restart.
    pub fn is_durable(&self) -> bool {
        matches!(self.backend, Backend::Durable(_))
    }

    fn hot(&self) -> std::sync::MutexGuard<'_, HotCache> {
        self.hot.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> DbResult<Option<Vec<u8>>> {
        let seen = {
            let mut hot = self.hot();
            if let Some(entry) = hot.entries.get(key) {
                return Ok(Some(entry.value.clone()));
            }
            hot.version
        };

        let entry = match &self.backend {
            Backend::Durable(db) => {
                let read_txn = db.begin_read()?;
                let table = read_txn.open_table(LOCAL_KV)?;
                let raw = table.get(key)?.map(|v| v.value().to_vec());
                raw.as_deref().and_then(decode)
            }
            Backend::Volatile(map) => map
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(key)
                .cloned(),
        };

        if let Some(entry) = &entry {
            let mut hot = self.hot();
            if hot.version == seen {
                hot.entries.put(key.to_string(), entry.clone());
            }
        }
        Ok(entry.map(|e| e.value))
    }

    pub fn put(&self, key: &str, value: &[u8], now_ms: i64) -> DbResult<()> {
        let entry = Entry {
            written_at: now_ms,
            value: value.to_vec(),
        };
        match &self.backend {
            Backend::Durable(db) => {
                let write_txn = db.begin_write()?;
                {
                    let mut table = write_txn.open_table(LOCAL_KV)?;
                    table.insert(key, encode(&entry).as_slice())?;
                }
                write_txn.commit()?;
            }
            Backend::Volatile(map) => {
                map.lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(key.to_string(), entry);
            }
        }
        self.hot().invalidate([key]);
        Ok(())
    }

    /// Remove a key. Returns whether it existed.
    pub fn remove(&self, key: &str) -> DbResult<bool> {
        let existed = match &self.backend {
            Backend::Durable(db) => {
                let write_txn = db.begin_write()?;
                let existed = {
                    let mut table = write_txn.open_table(LOCAL_KV)?;
                    let removed = table.remove(key)?.is_some();
                    removed
                };
                write_txn.commit()?;
                existed
            }
            Backend::Volatile(map) => map
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(key)
                .is_some(),
        };
        self.hot().invalidate([key]);
        Ok(existed)
    }

    /// Remove every entry for which `expired(key, written_at_ms)` holds.
    pub fn purge_where<F>(&self, expired: F) -> DbResult<u64>
    where
        F: Fn(&str, i64) -> bool,
    {
        let doomed: Vec<String> = match &self.backend {
            Backend::Durable(db) => {
                let write_txn = db.begin_write()?;
                let doomed = {
                    let mut table = write_txn.open_table(LOCAL_KV)?;
                    let mut doomed = Vec::new();
                    for item in table.iter()? {
                        let (k, v) = item?;
                        let stamp = decode(v.value()).map(|e| e.written_at).unwrap_or(0);
                        if expired(k.value(), stamp) {
                            doomed.push(k.value().to_string());
                        }
                    }
                    for key in &doomed {
                        table.remove(key.as_str())?;
                    }
                    doomed
                };
                write_txn.commit()?;
                doomed
            }
            Backend::Volatile(map) => {
                let mut map = map.lock().unwrap_or_else(|e| e.into_inner());
                let doomed: Vec<String> = map
                    .iter()
                    .filter(|(k, e)| expired(k, e.written_at))
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in &doomed {
                    map.remove(key);
                }
                doomed
            }
        };

        self.hot().invalidate(doomed.iter().map(String::as_str));
        Ok(doomed.len() as u64)
    }
}
