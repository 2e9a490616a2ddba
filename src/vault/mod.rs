// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Platform Credential Vault
//!
//! Install-scoped secret storage that survives restarts but not uninstall.
//! The master key, the migration flag and fallback-mode records live here.
//!
//! Implementations are synchronous; the store calls them through
//! `spawn_blocking` so vault I/O never blocks an async worker.

pub mod file;
pub mod memory;

pub use file::FileVault;
pub use memory::MemoryVault;

use std::io;

/// Error type for vault operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("vault I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid vault entry name: {0:?}")]
    InvalidEntryName(String),

    /// The platform refused access (device security downgraded, locked, ...).
    #[error("vault unavailable: {0}")]
    Unavailable(String),
}

pub type VaultResult<T> = Result<T, VaultError>;

/// Contract of the platform-protected credential vault.
pub trait CredentialVault: Send + Sync {
    /// Read an entry. `Ok(None)` when the entry does not exist.
    fn get(&self, entry: &str) -> VaultResult<Option<Vec<u8>>>;

    /// Create or replace an entry atomically.
    fn set(&self, entry: &str, value: &[u8]) -> VaultResult<()>;

    /// Remove an entry. Returns whether it existed.
    fn delete(&self, entry: &str) -> VaultResult<bool>;

    /// Names of all entries starting with `prefix`.
    fn entries_with_prefix(&self, prefix: &str) -> VaultResult<Vec<String>>;
}

/// Entry names must be non-empty and free of control characters.
pub(crate) fn validate_entry_name(entry: &str) -> VaultResult<()> {
    if entry.is_empty() || entry.chars().any(char::is_control) {
        return Err(VaultError::InvalidEntryName(entry.to_string()));
    }
    Ok(())
}
