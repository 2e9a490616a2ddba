// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the on-device storage layout.
//!
//! ```text
//! {data_dir}/
//!   records.redb          # SECURE tier: ciphertext records
//!   local.redb            # LOCAL / CLOUD tier: unencrypted key-value cache
//!   legacy/
//!     kv_store.json       # legacy key-value store (migrated away at startup)
//!   vault/                # default credential vault root
//! ```

use std::path::{Path, PathBuf};

/// Default app-storage root when `DATA_DIR` is not set.
pub const DATA_ROOT: &str = "./data";

/// Storage path utilities for the app data directory.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory for all app data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Embedded engine file holding encrypted records.
    pub fn records_db(&self) -> PathBuf {
        self.root.join("records.redb")
    }

    /// Embedded engine file backing the LOCAL tier.
    pub fn local_db(&self) -> PathBuf {
        self.root.join("local.redb")
    }

    /// Directory of the legacy key-value store.
    pub fn legacy_dir(&self) -> PathBuf {
        self.root.join("legacy")
    }

    /// Legacy key-value store file.
    pub fn legacy_store(&self) -> PathBuf {
        self.legacy_dir().join("kv_store.json")
    }

    /// Default credential vault root.
    pub fn vault_dir(&self) -> PathBuf {
        self.root.join("vault")
    }
}
