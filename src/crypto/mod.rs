// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key lifecycle and record encryption.
//!
//! - `master_key` - load-or-create of the per-installation master key
//! - `engine` - per-record key stretching and AES-256-GCM sealing

pub mod engine;
pub mod master_key;

pub use engine::{EncryptionEngine, SealedPayload, IV_LEN, SALT_LEN};
pub use master_key::{MasterKey, MasterKeyManager, MASTER_KEY_ENTRY, MASTER_KEY_LEN};

/// Error type for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Ciphertext, IV, salt or tag did not verify. The record is corrupt.
    #[error("{0}")]
    Integrity(String),

    #[error("secure random source unavailable")]
    RandomUnavailable,

    #[error("encryption failed")]
    Seal,
}
