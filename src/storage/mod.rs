// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! On-device persistence for every tier.
//!
//! ## Storage Layout
//!
//! ```text
//! {data_dir}/
//!   records.redb        # SECURE tier: sealed records (ciphertext, iv, salt)
//!   local.redb          # LOCAL / CLOUD tier: unencrypted key-value entries
//!   legacy/
//!     kv_store.json     # legacy plaintext store, drained by migration
//! {vault_dir}/          # master key, migration flag, fallback records
//! ```
//!
//! ## Important Notes
//!
//! - Nothing in this module encrypts; the SECURE tier hands it sealed records
//! - LOCAL entries are plaintext and must never hold PHI
//! - redb and vault calls are blocking; async callers go through
//!   `spawn_blocking`

pub mod keyed_lock;
pub mod legacy;
pub mod local_tier;
pub mod paths;
pub mod record_db;
pub mod record_store;

pub use keyed_lock::{KeyGuard, KeyedLocks};
pub use legacy::{FileLegacyStore, LegacyError, LegacyResult, LegacyStore, MemoryLegacyStore};
pub use local_tier::LocalTier;
pub use paths::StoragePaths;
pub use record_db::{DbError, DbResult, RecordDb};
pub use record_store::{fallback_entry, RecordStore, FALLBACK_PREFIX};
