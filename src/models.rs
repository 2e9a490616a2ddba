// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared record types for the health-data store.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Longest accepted user id / record id.
pub const MAX_ID_LEN: usize = 256;

/// Kind of PHI held in a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    HealthProfile,
    StackItem,
    ScanHistory,
    Preferences,
}

impl DataType {
    pub const ALL: [DataType; 4] = [
        DataType::HealthProfile,
        DataType::StackItem,
        DataType::ScanHistory,
        DataType::Preferences,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::HealthProfile => "health_profile",
            DataType::StackItem => "stack_item",
            DataType::ScanHistory => "scan_history",
            DataType::Preferences => "preferences",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StoreError::InvalidInput(format!("unknown data type: {s}")))
    }
}

/// Identity of one record: `(user_id, data_type, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub user_id: String,
    pub data_type: DataType,
    pub id: String,
}

impl RecordKey {
    /// Build a key, rejecting ids the storage layouts cannot represent.
    pub fn new(
        user_id: impl Into<String>,
        data_type: DataType,
        id: impl Into<String>,
    ) -> StoreResult<Self> {
        let key = Self {
            user_id: user_id.into(),
            data_type,
            id: id.into(),
        };
        validate_id("user_id", &key.user_id)?;
        validate_id("id", &key.id)?;
        Ok(key)
    }

    /// Bytes bound into the AEAD tag so a ciphertext only opens under its own key.
    pub fn associated_data(&self) -> Vec<u8> {
        format!("{}\0{}\0{}", self.user_id, self.data_type, self.id).into_bytes()
    }
}

/// Reject empty, oversized or NUL-containing identifiers.
pub fn validate_id(field: &str, value: &str) -> StoreResult<()> {
    if value.is_empty() {
        return Err(StoreError::InvalidInput(format!("{field} must not be empty")));
    }
    if value.len() > MAX_ID_LEN {
        return Err(StoreError::InvalidInput(format!(
            "{field} exceeds {MAX_ID_LEN} bytes"
        )));
    }
    if value.contains('\0') {
        return Err(StoreError::InvalidInput(format!(
            "{field} must not contain NUL"
        )));
    }
    Ok(())
}

/// Which records a deletion covers: a user, a user's records of one type,
/// or a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordScope {
    User(String),
    UserType(String, DataType),
    Record(RecordKey),
}

impl RecordScope {
    /// Build a scope from optional filters. An `id` without a `data_type`
    /// cannot name a record and is rejected.
    pub fn from_parts(
        user_id: &str,
        data_type: Option<DataType>,
        id: Option<&str>,
    ) -> StoreResult<Self> {
        validate_id("user_id", user_id)?;
        match (data_type, id) {
            (None, None) => Ok(RecordScope::User(user_id.to_string())),
            (Some(t), None) => Ok(RecordScope::UserType(user_id.to_string(), t)),
            (Some(t), Some(id)) => Ok(RecordScope::Record(RecordKey::new(user_id, t, id)?)),
            (None, Some(_)) => Err(StoreError::InvalidInput(
                "deleting by id requires a data type".to_string(),
            )),
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            RecordScope::User(user) | RecordScope::UserType(user, _) => user,
            RecordScope::Record(key) => &key.user_id,
        }
    }

    pub fn data_type(&self) -> Option<DataType> {
        match self {
            RecordScope::User(_) => None,
            RecordScope::UserType(_, t) => Some(*t),
            RecordScope::Record(key) => Some(key.data_type),
        }
    }

    /// Whether a record belongs to this scope.
    pub fn contains(&self, key: &RecordKey) -> bool {
        match self {
            RecordScope::User(user) => key.user_id == *user,
            RecordScope::UserType(user, t) => key.user_id == *user && key.data_type == *t,
            RecordScope::Record(k) => k == key,
        }
    }
}

/// One encrypted unit of PHI as persisted by the record store.
///
/// `ciphertext`, `iv` and `salt` are lowercase hex. Timestamps are unix
/// milliseconds; `updated_at` strictly increases across rewrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub id: String,
    pub user_id: String,
    pub data_type: DataType,
    pub ciphertext: String,
    pub iv: String,
    pub salt: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl HealthRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            user_id: self.user_id.clone(),
            data_type: self.data_type,
            id: self.id.clone(),
        }
    }
}

/// Decrypted record returned to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEntry {
    pub id: String,
    pub data_type: DataType,
    pub data: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Which backend serves the SECURE tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// Embedded engine open; full capability.
    Encrypted,
    /// Engine unavailable; records live in the credential vault and bulk
    /// listing returns nothing.
    Fallback,
    /// Master key unavailable; SECURE operations fail.
    Locked,
    /// Store has been shut down.
    Closed,
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoreMode::Encrypted => "encrypted",
            StoreMode::Fallback => "fallback",
            StoreMode::Locked => "locked",
            StoreMode::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Record counts for the SECURE tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_records: u64,
    pub by_type: BTreeMap<DataType, u64>,
    pub mode: StoreMode,
}

impl StoreStats {
    pub fn empty(mode: StoreMode) -> Self {
        Self {
            total_records: 0,
            by_type: BTreeMap::new(),
            mode,
        }
    }

    pub(crate) fn count(&mut self, data_type: DataType) {
        self.total_records += 1;
        *self.by_type.entry(data_type).or_insert(0) += 1;
    }
}
