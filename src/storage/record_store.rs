// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Record Store: durable storage of sealed records.
//!
//! The backend is chosen once at open time:
//!
//! - `Ready`: the embedded redb engine (`records.redb`).
//! - `Fallback`: the engine failed to open, so each record is stored as one
//!   credential-vault entry named `health_data_{user}_{type}_{id}`. Bulk
//!   listing is not supported in this mode and returns nothing.
//!
//! Records here are already sealed; this layer never sees plaintext.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::crypto::SealedPayload;
use crate::error::{StoreError, StoreResult};
use crate::models::{DataType, HealthRecord, RecordKey, RecordScope, StoreMode, StoreStats};
use crate::vault::CredentialVault;

use super::record_db::RecordDb;

/// Vault entry prefix of fallback-mode records.
pub const FALLBACK_PREFIX: &str = "health_data_";

const FALLBACK_PROBE: &str = "health_vault_probe";

enum Backend {
    Ready(Arc<RecordDb>),
    Fallback(Arc<dyn CredentialVault>),
}

pub struct RecordStore {
    backend: Backend,
}

/// Vault entry name of a fallback-mode record.
pub fn fallback_entry(key: &RecordKey) -> String {
    format!(
        "{FALLBACK_PREFIX}{}_{}_{}",
        key.user_id, key.data_type, key.id
    )
}

impl RecordStore {
    /// Open the embedded engine at `path`, degrading to the vault if it
    /// cannot be opened.
    pub fn open(path: &Path, cache_bytes: usize, vault: Arc<dyn CredentialVault>) -> Self {
        match RecordDb::open(path, cache_bytes) {
            Ok(db) => Self::ready(Arc::new(db)),
            Err(e) => {
                let err = StoreError::EngineInit(e.to_string());
                warn!(path = %path.display(), error = %err, "Record engine unavailable, entering fallback mode");
                Self::fallback(vault)
            }
        }
    }

    pub fn ready(db: Arc<RecordDb>) -> Self {
        Self {
            backend: Backend::Ready(db),
        }
    }

    pub fn fallback(vault: Arc<dyn CredentialVault>) -> Self {
        Self {
            backend: Backend::Fallback(vault),
        }
    }

    pub fn mode(&self) -> StoreMode {
        match self.backend {
            Backend::Ready(_) => StoreMode::Encrypted,
            Backend::Fallback(_) => StoreMode::Fallback,
        }
    }

    /// Upsert a sealed record. Replacement keeps `created_at` and advances
    /// `updated_at`.
    pub fn put(&self, key: &RecordKey, sealed: SealedPayload, now_ms: i64) -> StoreResult<HealthRecord> {
        match &self.backend {
            Backend::Ready(db) => Ok(db.upsert(key, sealed, now_ms)?),
            Backend::Fallback(vault) => {
                let entry = fallback_entry(key);
                // An unreadable previous entry is replaced, not preserved.
                let previous = match read_fallback(vault.as_ref(), &entry) {
                    Err(StoreError::Integrity(msg)) => {
                        warn!(entry = %entry, error = %msg, "Overwriting unreadable fallback record");
                        None
                    }
                    other => other?,
                };
                let (created_at, updated_at) = match previous {
                    Some(prev) if prev.key() != *key => {
                        return Err(StoreError::Storage(format!(
                            "vault entry {entry} already holds another record"
                        )));
                    }
                    Some(prev) => (prev.created_at, now_ms.max(prev.updated_at + 1)),
                    None => (now_ms, now_ms),
                };
                let record = HealthRecord {
                    id: key.id.clone(),
                    user_id: key.user_id.clone(),
                    data_type: key.data_type,
                    ciphertext: sealed.ciphertext,
                    iv: sealed.iv,
                    salt: sealed.salt,
                    created_at,
                    updated_at,
                };
                vault.set(&entry, &serde_json::to_vec(&record)?)?;
                Ok(record)
            }
        }
    }

    pub fn get(&self, key: &RecordKey) -> StoreResult<Option<HealthRecord>> {
        match &self.backend {
            Backend::Ready(db) => Ok(db.get(key)?),
            Backend::Fallback(vault) => {
                let record = read_fallback(vault.as_ref(), &fallback_entry(key))?;
                Ok(record.filter(|r| r.key() == *key))
            }
        }
    }

    /// All records of `(user_id, data_type)`, newest first. Empty in
    /// fallback mode.
    pub fn list(&self, user_id: &str, data_type: DataType) -> StoreResult<Vec<HealthRecord>> {
        match &self.backend {
            Backend::Ready(db) => Ok(db.list(user_id, data_type)?),
            Backend::Fallback(_) => {
                debug!(user_id, data_type = %data_type, "Bulk listing unsupported in fallback mode");
                Ok(Vec::new())
            }
        }
    }

    /// Delete every record in `scope`; returns the number removed.
    pub fn delete(&self, scope: &RecordScope) -> StoreResult<u64> {
        match &self.backend {
            Backend::Ready(db) => Ok(db.delete(scope)?),
            Backend::Fallback(vault) => {
                // Unreadable entries are matched by name and erased too.
                if let RecordScope::Record(key) = scope {
                    let entry = fallback_entry(key);
                    return match read_fallback(vault.as_ref(), &entry) {
                        Ok(Some(r)) if r.key() == *key => Ok(u64::from(vault.delete(&entry)?)),
                        Ok(_) => Ok(0),
                        Err(StoreError::Integrity(msg)) => {
                            warn!(entry = %entry, error = %msg, "Erasing unreadable fallback record");
                            Ok(u64::from(vault.delete(&entry)?))
                        }
                        Err(e) => Err(e),
                    };
                }
                let mut removed = 0;
                for entry in vault.entries_with_prefix(&scope_prefix(scope))? {
                    let doomed = match read_fallback(vault.as_ref(), &entry) {
                        Ok(Some(record)) => scope.contains(&record.key()),
                        Ok(None) => false,
                        Err(StoreError::Integrity(msg)) => {
                            warn!(entry = %entry, error = %msg, "Erasing unreadable fallback record");
                            true
                        }
                        Err(e) => return Err(e),
                    };
                    if doomed && vault.delete(&entry)? {
                        removed += 1;
                    }
                }
                Ok(removed)
            }
        }
    }

    /// Delete records of `data_type` last written before `cutoff_ms`.
    pub fn purge_expired(&self, data_type: DataType, cutoff_ms: i64) -> StoreResult<u64> {
        match &self.backend {
            Backend::Ready(db) => Ok(db.purge_expired(data_type, cutoff_ms)?),
            Backend::Fallback(vault) => {
                let mut removed = 0;
                for (entry, record) in scan_fallback(vault.as_ref())? {
                    if record.data_type == data_type
                        && record.updated_at < cutoff_ms
                        && vault.delete(&entry)?
                    {
                        removed += 1;
                    }
                }
                Ok(removed)
            }
        }
    }

    pub fn stats(&self) -> StoreResult<StoreStats> {
        match &self.backend {
            Backend::Ready(db) => Ok(db.stats()?),
            Backend::Fallback(vault) => {
                let mut stats = StoreStats::empty(StoreMode::Fallback);
                for (_, record) in scan_fallback(vault.as_ref())? {
                    stats.count(record.data_type);
                }
                Ok(stats)
            }
        }
    }

    /// Write-read-delete probe of the active backend.
    pub fn health_check(&self) -> StoreResult<()> {
        match &self.backend {
            Backend::Ready(db) => Ok(db.health_check()?),
            Backend::Fallback(vault) => {
                vault.set(FALLBACK_PROBE, b"ok")?;
                let read = vault.get(FALLBACK_PROBE)?;
                vault.delete(FALLBACK_PROBE)?;
                if read.as_deref() != Some(&b"ok"[..]) {
                    return Err(StoreError::Storage("vault probe mismatch".to_string()));
                }
                Ok(())
            }
        }
    }

    /// Direct access to the embedded engine, if open.
    #[cfg(test)]
    pub(crate) fn db(&self) -> Option<&RecordDb> {
        match &self.backend {
            Backend::Ready(db) => Some(db.as_ref()),
            Backend::Fallback(_) => None,
        }
    }
}

/// Entry-name prefix shared by every fallback record in `scope`.
fn scope_prefix(scope: &RecordScope) -> String {
    match scope {
        RecordScope::User(user) => format!("{FALLBACK_PREFIX}{user}_"),
        RecordScope::UserType(user, data_type) => format!("{FALLBACK_PREFIX}{user}_{data_type}_"),
        RecordScope::Record(key) => fallback_entry(key),
    }
}

fn read_fallback(vault: &dyn CredentialVault, entry: &str) -> StoreResult<Option<HealthRecord>> {
    match vault.get(entry)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Integrity(format!("fallback entry {entry}: {e}"))),
        None => Ok(None),
    }
}

/// Every decodable fallback record; undecodable entries are logged and left.
fn scan_fallback(vault: &dyn CredentialVault) -> StoreResult<Vec<(String, HealthRecord)>> {
    let mut records = Vec::new();
    for entry in vault.entries_with_prefix(FALLBACK_PREFIX)? {
        match read_fallback(vault, &entry) {
            Ok(Some(record)) => records.push((entry, record)),
            Ok(None) => {}
            Err(e) => warn!(entry = %entry, error = %e, "Skipping unreadable fallback record"),
        }
    }
    Ok(records)
}
