// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # SECURE Tier
//!
//! Encryption Engine + Record Store behind one handle.
//!
//! ## State
//!
//! | State | Seal / open | Delete / stats / purge |
//! |---|---|---|
//! | `Open` | yes | yes |
//! | `Locked` (master key unavailable) | `KeyUnavailable` | yes |
//! | `Closed` (after shutdown) | `Unavailable` | `Unavailable` |
//!
//! ## Concurrency
//!
//! - Writers on the same record key are serialized by [`KeyedLocks`].
//! - A write runs in its own task: dropping the caller's future does not
//!   cancel it, so the per-key writer slot is always released cleanly.
//! - Every operation holds a read guard on the state for its whole duration;
//!   [`SecureStore::close`] takes the write guard and so waits for them.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tracing::{info, warn};

use crate::crypto::{EncryptionEngine, MasterKey, MasterKeyManager, SealedPayload};
use crate::error::{run_blocking, StoreError, StoreResult};
use crate::models::{DataType, HealthRecord, RecordKey, RecordScope, StoreMode, StoreStats};
use crate::storage::{KeyedLocks, RecordStore};
use crate::vault::CredentialVault;

enum SecureState {
    Open {
        key: Arc<MasterKey>,
        records: Arc<RecordStore>,
    },
    Locked {
        reason: String,
        records: Arc<RecordStore>,
    },
    Closed,
}

impl SecureState {
    fn sealing(&self) -> StoreResult<(Arc<MasterKey>, Arc<RecordStore>)> {
        match self {
            SecureState::Open { key, records } => Ok((Arc::clone(key), Arc::clone(records))),
            SecureState::Locked { reason, .. } => Err(StoreError::KeyUnavailable(reason.clone())),
            SecureState::Closed => Err(closed()),
        }
    }

    fn records(&self) -> StoreResult<Arc<RecordStore>> {
        match self {
            SecureState::Open { records, .. } | SecureState::Locked { records, .. } => {
                Ok(Arc::clone(records))
            }
            SecureState::Closed => Err(closed()),
        }
    }
}

fn closed() -> StoreError {
    StoreError::Unavailable("store has been shut down".to_string())
}

/// A record opened and verified.
#[derive(Debug, Clone)]
pub struct OpenedRecord {
    pub record: HealthRecord,
    pub plaintext: Vec<u8>,
}

pub struct SecureStore {
    state: Arc<RwLock<SecureState>>,
    engine: EncryptionEngine,
    locks: KeyedLocks<RecordKey>,
}

impl SecureStore {
    /// Load the master key and open the record engine.
    ///
    /// Never fails: an unavailable key yields `Locked`, an engine that will
    /// not open yields fallback mode.
    pub async fn open(
        records_path: &Path,
        cache_bytes: usize,
        vault: Arc<dyn CredentialVault>,
        keys: &MasterKeyManager,
        engine: EncryptionEngine,
    ) -> Self {
        let path = records_path.to_path_buf();
        let fallback_vault = Arc::clone(&vault);
        let records = match run_blocking(move || {
            Ok(RecordStore::open(&path, cache_bytes, vault))
        })
        .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Record engine open task failed, entering fallback mode");
                RecordStore::fallback(fallback_vault)
            }
        };

        Self::with_records(Arc::new(records), keys, engine).await
    }

    /// Build around an already opened record store.
    pub async fn with_records(
        records: Arc<RecordStore>,
        keys: &MasterKeyManager,
        engine: EncryptionEngine,
    ) -> Self {
        let state = match keys.get_or_create_master_key().await {
            Ok(key) => {
                info!(mode = %records.mode(), "SECURE tier ready");
                SecureState::Open { key, records }
            }
            Err(e) => {
                warn!(error = %e, "Master key unavailable, SECURE tier locked");
                SecureState::Locked {
                    reason: e.to_string(),
                    records,
                }
            }
        };

        Self {
            state: Arc::new(RwLock::new(state)),
            engine,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn mode(&self) -> StoreMode {
        match &*self.state.read().await {
            SecureState::Open { records, .. } => records.mode(),
            SecureState::Locked { .. } => StoreMode::Locked,
            SecureState::Closed => StoreMode::Closed,
        }
    }

    /// Seal `plaintext` and upsert it under `key`.
    pub async fn put(&self, key: RecordKey, plaintext: Vec<u8>) -> StoreResult<HealthRecord> {
        let state = Arc::clone(&self.state);
        let engine = self.engine.clone();
        let locks = self.locks.clone();

        let task = tokio::spawn(async move {
            let _writer = locks.lock(key.clone()).await;
            let state: OwnedRwLockReadGuard<SecureState> = state.read_owned().await;
            let (master, records) = state.sealing()?;
            let now = chrono::Utc::now().timestamp_millis();
            run_blocking(move || {
                let sealed = engine.seal(&master, &key.associated_data(), &plaintext)?;
                records.put(&key, sealed, now)
            })
            .await
        });

        task.await
            .map_err(|e| StoreError::Storage(format!("write task failed: {e}")))?
    }

    /// Records of `(user_id, data_type)`, or the single record `id`.
    ///
    /// Records that fail verification are logged and left out. If every
    /// matching record fails, the call fails with `Integrity`.
    pub async fn get(
        &self,
        user_id: &str,
        data_type: DataType,
        id: Option<&str>,
    ) -> StoreResult<Vec<OpenedRecord>> {
        let single = id.map(|id| RecordKey::new(user_id, data_type, id)).transpose()?;
        let user_id = user_id.to_string();

        let state = self.state.read().await;
        let (master, records) = state.sealing()?;
        let engine = self.engine.clone();

        run_blocking(move || {
            let mut failures = 0usize;
            let found = match single {
                Some(key) => match records.get(&key) {
                    Ok(record) => record.into_iter().collect(),
                    Err(StoreError::Integrity(msg)) => {
                        warn!(user_id = %key.user_id, data_type = %key.data_type, id = %key.id, error = %msg, "Unreadable record");
                        failures += 1;
                        Vec::new()
                    }
                    Err(e) => return Err(e),
                },
                None => records.list(&user_id, data_type)?,
            };

            let mut opened = Vec::with_capacity(found.len());
            for record in found {
                match open_record(&engine, &master, &record) {
                    Ok(plaintext) => opened.push(OpenedRecord { record, plaintext }),
                    Err(e) => {
                        warn!(
                            user_id = %record.user_id,
                            data_type = %record.data_type,
                            id = %record.id,
                            error = %e,
                            "Skipping record that failed integrity verification"
                        );
                        failures += 1;
                    }
                }
            }

            if opened.is_empty() && failures > 0 {
                return Err(StoreError::Integrity(format!(
                    "all {failures} matching record(s) failed verification"
                )));
            }
            Ok(opened)
        })
        .await
    }

    /// Delete the records in `scope`; returns the number removed.
    pub async fn delete(&self, scope: RecordScope) -> StoreResult<u64> {
        let _writer = match &scope {
            RecordScope::Record(key) => Some(self.locks.lock(key.clone()).await),
            _ => None,
        };
        let state = self.state.read().await;
        let records = state.records()?;
        run_blocking(move || records.delete(&scope)).await
    }

    /// Delete records of `data_type` last written before `cutoff_ms`.
    pub async fn purge_expired(&self, data_type: DataType, cutoff_ms: i64) -> StoreResult<u64> {
        let state = self.state.read().await;
        let records = state.records()?;
        run_blocking(move || records.purge_expired(data_type, cutoff_ms)).await
    }

    pub async fn stats(&self) -> StoreResult<StoreStats> {
        let state = self.state.read().await;
        let locked = matches!(&*state, SecureState::Locked { .. });
        let records = state.records()?;
        let mut stats = run_blocking(move || records.stats()).await?;
        if locked {
            stats.mode = StoreMode::Locked;
        }
        Ok(stats)
    }

    /// Probe the record backend. A locked tier reports `KeyUnavailable`.
    pub async fn health_check(&self) -> StoreResult<()> {
        let state = self.state.read().await;
        let (_, records) = state.sealing()?;
        run_blocking(move || records.health_check()).await
    }

    /// Wait for in-flight operations and release the engine.
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        if !matches!(*state, SecureState::Closed) {
            *state = SecureState::Closed;
            info!("SECURE tier closed");
        }
    }

    #[cfg(test)]
    pub(crate) async fn record_store(&self) -> Option<Arc<RecordStore>> {
        self.state.read().await.records().ok()
    }
}

fn open_record(
    engine: &EncryptionEngine,
    master: &MasterKey,
    record: &HealthRecord,
) -> StoreResult<Vec<u8>> {
    let sealed = SealedPayload {
        ciphertext: record.ciphertext.clone(),
        iv: record.iv.clone(),
        salt: record.salt.clone(),
    };
    Ok(engine.open(master, &record.key().associated_data(), &sealed)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::MemoryVault;
    use std::time::Duration;

    async fn open_store(dir: &Path, vault: Arc<MemoryVault>) -> SecureStore {
        let keys = MasterKeyManager::new(vault.clone());
        SecureStore::open(
            &dir.join("records.redb"),
            1 << 20,
            vault,
            &keys,
            EncryptionEngine::new(10),
        )
        .await
    }

    fn key(id: &str) -> RecordKey {
        RecordKey::new("u1", DataType::StackItem, id).unwrap()
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), Arc::new(MemoryVault::new())).await;
        assert_eq!(store.mode().await, StoreMode::Encrypted);

        store.put(key("a"), b"vitamin d".to_vec()).await.unwrap();
        let got = store.get("u1", DataType::StackItem, Some("a")).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].plaintext, b"vitamin d");
        assert_ne!(got[0].record.ciphertext, hex::encode(b"vitamin d"));
    }

    #[tokio::test]
    async fn concurrent_writes_to_one_key_leave_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(open_store(dir.path(), Arc::new(MemoryVault::new())).await);

        let mut handles = Vec::new();
        for i in 0..10u8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.put(key("same"), vec![i]).await.unwrap()
            }));
        }
        let mut stamps = Vec::new();
        for h in handles {
            stamps.push(h.await.unwrap().updated_at);
        }
        stamps.sort();
        stamps.dedup();
        assert_eq!(stamps.len(), 10, "every write advanced updated_at");

        let all = store.get("u1", DataType::StackItem, None).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn abandoned_put_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), Arc::new(MemoryVault::new())).await;

        let fut = store.put(key("dropped"), b"x".to_vec());
        // Poll once so the write task is spawned, then drop the future.
        let _ = tokio::time::timeout(Duration::from_nanos(1), fut).await;

        let mut found = false;
        for _ in 0..100 {
            if !store
                .get("u1", DataType::StackItem, Some("dropped"))
                .await
                .unwrap()
                .is_empty()
            {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(found);
    }

    #[tokio::test]
    async fn tampered_record_is_skipped_in_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), Arc::new(MemoryVault::new())).await;
        store.put(key("good"), b"1".to_vec()).await.unwrap();
        let mut bad = store.put(key("bad"), b"2".to_vec()).await.unwrap();

        bad.iv = format!("{}{}", if bad.iv.starts_with('0') { '1' } else { '0' }, &bad.iv[1..]);
        let records = store.record_store().await.unwrap();
        records.db().unwrap().overwrite_raw(&bad).unwrap();

        let listed = store.get("u1", DataType::StackItem, None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].record.id, "good");

        assert!(matches!(
            store.get("u1", DataType::StackItem, Some("bad")).await,
            Err(StoreError::Integrity(_))
        ));
    }

    #[tokio::test]
    async fn ciphertext_moved_to_another_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), Arc::new(MemoryVault::new())).await;
        let mut record = store.put(key("a"), b"secret".to_vec()).await.unwrap();
        record.id = "b".to_string();
        store
            .record_store()
            .await
            .unwrap()
            .db()
            .unwrap()
            .overwrite_raw(&record)
            .unwrap();

        assert!(store.get("u1", DataType::StackItem, Some("b")).await.is_err());
    }

    #[tokio::test]
    async fn locked_store_refuses_sealing_but_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(MemoryVault::new());
        vault.set_unavailable(true);
        let store = open_store(dir.path(), vault).await;
        assert_eq!(store.mode().await, StoreMode::Locked);

        assert!(matches!(
            store.put(key("a"), b"x".to_vec()).await,
            Err(StoreError::KeyUnavailable(_))
        ));
        assert_eq!(store.delete(RecordScope::User("u1".into())).await.unwrap(), 0);
        assert_eq!(store.stats().await.unwrap().mode, StoreMode::Locked);
    }

    #[tokio::test]
    async fn close_rejects_later_calls() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), Arc::new(MemoryVault::new())).await;
        store.put(key("a"), b"x".to_vec()).await.unwrap();
        store.close().await;

        assert_eq!(store.mode().await, StoreMode::Closed);
        assert!(matches!(
            store.get("u1", DataType::StackItem, None).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.put(key("b"), b"y".to_vec()).await.is_err());
    }
}
