// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process credential vault for tests and ephemeral runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{validate_entry_name, CredentialVault, VaultError, VaultResult};

/// Vault backed by a `BTreeMap`. Can be switched unavailable to simulate a
/// platform that refuses access.
#[derive(Debug, Default)]
pub struct MemoryVault {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    unavailable: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `VaultError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful `set` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self) -> VaultResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(VaultError::Unavailable("vault access refused".to_string()));
        }
        Ok(())
    }

    fn entries(&self) -> VaultResult<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| VaultError::Unavailable("vault lock poisoned".to_string()))
    }
}

impl CredentialVault for MemoryVault {
    fn get(&self, entry: &str) -> VaultResult<Option<Vec<u8>>> {
        self.check()?;
        validate_entry_name(entry)?;
        Ok(self.entries()?.get(entry).cloned())
    }

    fn set(&self, entry: &str, value: &[u8]) -> VaultResult<()> {
        self.check()?;
        validate_entry_name(entry)?;
        self.entries()?.insert(entry.to_string(), value.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, entry: &str) -> VaultResult<bool> {
        self.check()?;
        validate_entry_name(entry)?;
        Ok(self.entries()?.remove(entry).is_some())
    }

    fn entries_with_prefix(&self, prefix: &str) -> VaultResult<Vec<String>> {
        self.check()?;
        Ok(self
            .entries()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
