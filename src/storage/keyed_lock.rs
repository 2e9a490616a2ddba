// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-key async locks.
//!
//! At most one writer holds a given key at a time; writers on different keys
//! never contend beyond the short map lookup. Idle entries are dropped when
//! their last guard is released. A waiter cancelled after that release
//! leaves its entry behind; `lock` sweeps such entries before inserting.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

type LockMap<K> = HashMap<K, Arc<tokio::sync::Mutex<()>>>;

pub struct KeyedLocks<K> {
    inner: Arc<Mutex<LockMap<K>>>,
}

impl<K> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait until `key` is free and hold it until the guard drops.
    pub async fn lock(&self, key: K) -> KeyGuard<K> {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            // Only the map holds an idle slot.
            map.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(map.entry(key.clone()).or_default())
        };
        let guard = slot.clone().lock_owned().await;
        KeyGuard {
            key: Some(key),
            slot,
            guard: Some(guard),
            locks: Arc::clone(&self.inner),
        }
    }

    /// Number of keys currently locked or awaited.
    pub fn active(&self) -> usize {
        self.inner
            .lock()
            .map(|m| m.values().filter(|slot| Arc::strong_count(slot) > 1).count())
            .unwrap_or(0)
    }

    #[cfg(test)]
    fn entries(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }
}

pub struct KeyGuard<K: Eq + Hash> {
    key: Option<K>,
    slot: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<LockMap<K>>>,
}

impl<K: Eq + Hash> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        // Release the mutex first so the strong count reflects waiters only.
        self.guard.take();
        let Some(key) = self.key.take() else {
            return;
        };
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Map entry + our `slot` clone: nobody else holds or waits on it.
        if Arc::strong_count(&self.slot) == 2 {
            map.remove(&key);
        }
    }
}
