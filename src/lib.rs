// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Health Vault - on-device encrypted health-data store
//!
//! Persists personally identifiable health information encrypted at rest,
//! routes logical keys across SECURE / LOCAL / CLOUD tiers, and moves
//! entries off the legacy plaintext key-value store once.
//!
//! ## Modules
//!
//! - `vault` - Platform credential vault contract and implementations
//! - `crypto` - Master key lifecycle and record encryption
//! - `storage` - Record engine, fallback storage, LOCAL tier, legacy store
//! - `policy` - Category to storage policy table
//! - `secure` - SECURE tier (encrypt + persist)
//! - `router` - Tier router with migration barrier
//! - `migration` - One-time legacy migration
//! - `store` - `HealthDataStore` handle and consumer API
//! - `retention` - Background retention sweeper
//! - `api` - Loopback HTTP adapter (Axum)

pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod migration;
pub mod models;
pub mod policy;
pub mod retention;
pub mod router;
pub mod secure;
pub mod state;
pub mod storage;
pub mod store;
pub mod vault;

pub use error::{StoreError, StoreResult};
pub use models::{DataType, HealthEntry, HealthRecord, StoreMode, StoreStats};
pub use store::{HealthDataStore, StoreDependencies};
