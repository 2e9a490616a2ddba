// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded record database backed by redb (pure Rust, ACID).
//!
//! redb commits are copy-on-write with a checksummed root, so a crash
//! mid-commit leaves the previous committed state readable on next open.
//!
//! ## Table Layout
//!
//! - `health_records`: composite key (`user_id \0 data_type \0 id`) → JSON row
//!   `{encrypted_data, iv, salt, created_at, updated_at}`
//! - `probe`: scratch table for health checks
//!
//! Ids never contain NUL, so every key of a user (or user + type) lives in
//! one contiguous range starting at `user \0` (or `user \0 type \0`).

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::crypto::SealedPayload;
use crate::models::{DataType, HealthRecord, RecordKey, RecordScope, StoreMode, StoreStats};

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: composite record key → serialized `RecordRow` (JSON bytes).
const HEALTH_RECORDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("health_records");

/// Health-check scratch table.
const PROBE: TableDefinition<&str, &[u8]> = TableDefinition::new("probe");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A stored row or key could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Row / Key Helpers
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordRow {
    encrypted_data: String,
    iv: String,
    salt: String,
    created_at: i64,
    updated_at: i64,
}

impl RecordRow {
    fn into_record(self, key: RecordKey) -> HealthRecord {
        HealthRecord {
            id: key.id,
            user_id: key.user_id,
            data_type: key.data_type,
            ciphertext: self.encrypted_data,
            iv: self.iv,
            salt: self.salt,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Build the composite key `user \0 type \0 id`.
fn make_record_key(key: &RecordKey) -> Vec<u8> {
    let mut out = make_prefix(&key.user_id, Some(key.data_type));
    out.extend_from_slice(key.id.as_bytes());
    out
}

/// Prefix covering all of a user's records, optionally narrowed to one type.
fn make_prefix(user_id: &str, data_type: Option<DataType>) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(user_id.len() + 32);
    prefix.extend_from_slice(user_id.as_bytes());
    prefix.push(0);
    if let Some(t) = data_type {
        prefix.extend_from_slice(t.as_str().as_bytes());
        prefix.push(0);
    }
    prefix
}

/// Exclusive upper bound of a prefix range: the trailing NUL becomes 0x01.
fn make_prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    if let Some(last) = end.last_mut() {
        *last = 1;
    }
    end
}

fn decode_record_key(bytes: &[u8]) -> Option<RecordKey> {
    let mut parts = bytes.splitn(3, |b| *b == 0);
    let user_id = std::str::from_utf8(parts.next()?).ok()?;
    let data_type = std::str::from_utf8(parts.next()?).ok()?.parse().ok()?;
    let id = std::str::from_utf8(parts.next()?).ok()?;
    Some(RecordKey {
        user_id: user_id.to_string(),
        data_type,
        id: id.to_string(),
    })
}

fn decode_row(key_bytes: &[u8], value: &[u8]) -> DbResult<HealthRecord> {
    let key = decode_record_key(key_bytes)
        .ok_or_else(|| DbError::Corrupt("undecodable record key".to_string()))?;
    let row: RecordRow = serde_json::from_slice(value)
        .map_err(|e| DbError::Corrupt(format!("record {}: {e}", key.id)))?;
    Ok(row.into_record(key))
}

// =============================================================================
// RecordDb
// =============================================================================

/// Embedded ACID record database.
pub struct RecordDb {
    db: Database,
}

impl RecordDb {
    /// Open (or create) the database at the given path.
    ///
    /// `cache_bytes` sizes redb's in-memory page cache.
    pub fn open(path: &Path, cache_bytes: usize) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = redb::Builder::new()
            .set_cache_size(cache_bytes)
            .create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(HEALTH_RECORDS)?;
            let _ = write_txn.open_table(PROBE)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Insert or replace a record in one transaction.
    ///
    /// `created_at` survives replacement; `updated_at` is `now_ms`, bumped
    /// past the previous value if the clock has not advanced.
    pub fn upsert(
        &self,
        key: &RecordKey,
        sealed: SealedPayload,
        now_ms: i64,
    ) -> DbResult<HealthRecord> {
        let composite = make_record_key(key);

        let write_txn = self.db.begin_write()?;
        let row = {
            let mut table = write_txn.open_table(HEALTH_RECORDS)?;

            // Read existing timestamps before mutating
            let previous = match table.get(composite.as_slice())? {
                Some(existing) => serde_json::from_slice::<RecordRow>(existing.value()).ok(),
                None => None,
            };

            let (created_at, updated_at) = match previous {
                Some(prev) => (prev.created_at, now_ms.max(prev.updated_at + 1)),
                None => (now_ms, now_ms),
            };
            let row = RecordRow {
                encrypted_data: sealed.ciphertext,
                iv: sealed.iv,
                salt: sealed.salt,
                created_at,
                updated_at,
            };
            let json = serde_json::to_vec(&row)?;
            table.insert(composite.as_slice(), json.as_slice())?;
            row
        };
        write_txn.commit()?;

        Ok(row.into_record(key.clone()))
    }

    /// Look up a single record.
    pub fn get(&self, key: &RecordKey) -> DbResult<Option<HealthRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(HEALTH_RECORDS)?;
        let composite = make_record_key(key);
        match table.get(composite.as_slice())? {
            Some(value) => Ok(Some(decode_row(&composite, value.value())?)),
            None => Ok(None),
        }
    }

    /// All records of `(user_id, data_type)`, newest `updated_at` first.
    ///
    /// Rows that fail to decode are skipped and logged.
    pub fn list(&self, user_id: &str, data_type: DataType) -> DbResult<Vec<HealthRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(HEALTH_RECORDS)?;

        let prefix = make_prefix(user_id, Some(data_type));
        let prefix_end = make_prefix_end(&prefix);

        let mut records = Vec::new();
        for entry in table.range(prefix.as_slice()..prefix_end.as_slice())? {
            let (k, v) = entry?;
            match decode_row(k.value(), v.value()) {
                Ok(record) => records.push(record),
                Err(e) => warn!(user_id, data_type = %data_type, error = %e, "Skipping corrupt record row"),
            }
        }

        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    /// Delete every record in `scope`. Returns the number removed.
    pub fn delete(&self, scope: &RecordScope) -> DbResult<u64> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(HEALTH_RECORDS)?;
            match scope {
                RecordScope::Record(key) => {
                    let composite = make_record_key(key);
                    let existed = table.remove(composite.as_slice())?.is_some();
                    u64::from(existed)
                }
                _ => {
                    let prefix = make_prefix(scope.user_id(), scope.data_type());
                    let prefix_end = make_prefix_end(&prefix);
                    let mut keys = Vec::new();
                    for entry in table.range(prefix.as_slice()..prefix_end.as_slice())? {
                        let (k, _) = entry?;
                        keys.push(k.value().to_vec());
                    }
                    for key in &keys {
                        table.remove(key.as_slice())?;
                    }
                    keys.len() as u64
                }
            }
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Delete records of `data_type` last written before `cutoff_ms`.
    pub fn purge_expired(&self, data_type: DataType, cutoff_ms: i64) -> DbResult<u64> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(HEALTH_RECORDS)?;
            let mut expired = Vec::new();
            for entry in table.iter()? {
                let (k, v) = entry?;
                let Ok(record) = decode_row(k.value(), v.value()) else {
                    continue;
                };
                if record.data_type == data_type && record.updated_at < cutoff_ms {
                    expired.push(k.value().to_vec());
                }
            }
            for key in &expired {
                table.remove(key.as_slice())?;
            }
            expired.len() as u64
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Count records per data type.
    pub fn stats(&self) -> DbResult<StoreStats> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(HEALTH_RECORDS)?;
        let mut stats = StoreStats::empty(StoreMode::Encrypted);
        for entry in table.iter()? {
            let (k, _) = entry?;
            if let Some(key) = decode_record_key(k.value()) {
                stats.count(key.data_type);
            }
        }
        Ok(stats)
    }

    /// Write-read-delete probe inside the database.
    pub fn health_check(&self) -> DbResult<()> {
        let data: &[u8] = b"health_check_data";
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PROBE)?;
            table.insert("probe", data)?;
        }
        write_txn.commit()?;

        let matches = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(PROBE)?;
            let value = table.get("probe")?;
            value.map(|v| v.value() == data).unwrap_or(false)
        };

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PROBE)?;
            table.remove("probe")?;
        }
        write_txn.commit()?;

        if !matches {
            return Err(DbError::Corrupt("health check data mismatch".to_string()));
        }
        Ok(())
    }

    /// Overwrite the stored row of a record verbatim. Test-only tamper hook.
    #[cfg(test)]
    pub(crate) fn overwrite_raw(&self, record: &HealthRecord) -> DbResult<()> {
        let row = RecordRow {
            encrypted_data: record.ciphertext.clone(),
            iv: record.iv.clone(),
            salt: record.salt.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        };
        let json = serde_json::to_vec(&row)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(HEALTH_RECORDS)?;
            table.insert(make_record_key(&record.key()).as_slice(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
