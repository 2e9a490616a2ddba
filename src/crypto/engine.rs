// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Record encryption engine.
//!
//! ## Construction
//!
//! ```text
//! salt       = 32 random bytes (fresh per seal)
//! iv         = 16 random bytes (fresh per seal)
//! record_key = PBKDF2-HMAC-SHA256(master_key, salt, iterations)
//! ciphertext = AES-256-GCM(record_key, iv, plaintext, aad) || tag
//! ```
//!
//! `aad` is the record identity, so a ciphertext copied under another key
//! fails to open. All three stored fields are lowercase hex with fixed
//! lengths; anything else is rejected as an integrity failure before any
//! decryption is attempted.
//!
//! Sealing and opening are CPU-bound (key stretching); callers run them via
//! `spawn_blocking`.

use std::num::NonZeroU32;

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use super::{CryptoError, MasterKey};

/// Per-record IV length in bytes (128-bit).
pub const IV_LEN: usize = 16;

/// Per-record salt length in bytes (256-bit).
pub const SALT_LEN: usize = 32;

/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

const RECORD_KEY_LEN: usize = 32;

/// AES-256-GCM with a 128-bit nonce.
type Aes256Gcm128 = AesGcm<Aes256, U16>;

/// Output of [`EncryptionEngine::seal`]; every field is hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    pub ciphertext: String,
    pub iv: String,
    pub salt: String,
}

/// Per-record key material, zeroed on drop.
struct RecordKeyMaterial([u8; RECORD_KEY_LEN]);

impl Drop for RecordKeyMaterial {
    fn drop(&mut self) {
        self.0 = [0u8; RECORD_KEY_LEN];
    }
}

/// Seals and opens record payloads under the master key.
#[derive(Debug, Clone)]
pub struct EncryptionEngine {
    iterations: NonZeroU32,
    rng: SystemRandom,
}

impl EncryptionEngine {
    /// Default PBKDF2 iteration count.
    pub const DEFAULT_ITERATIONS: u32 = 100_000;

    /// Create an engine. An iteration count of zero is raised to one.
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: NonZeroU32::new(iterations).unwrap_or(NonZeroU32::MIN),
            rng: SystemRandom::new(),
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations.get()
    }

    /// Encrypt `plaintext` with a fresh IV and salt.
    pub fn seal(
        &self,
        master: &MasterKey,
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<SealedPayload, CryptoError> {
        let mut iv = [0u8; IV_LEN];
        let mut salt = [0u8; SALT_LEN];
        self.rng
            .fill(&mut iv)
            .map_err(|_| CryptoError::RandomUnavailable)?;
        self.rng
            .fill(&mut salt)
            .map_err(|_| CryptoError::RandomUnavailable)?;

        let record_key = self.derive_record_key(master, &salt);
        let cipher =
            Aes256Gcm128::new_from_slice(&record_key.0).map_err(|_| CryptoError::Seal)?;
        let ciphertext = cipher
            .encrypt(
                Nonce::<U16>::from_slice(&iv),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::Seal)?;

        Ok(SealedPayload {
            ciphertext: hex::encode(ciphertext),
            iv: hex::encode(iv),
            salt: hex::encode(salt),
        })
    }

    /// Decrypt and authenticate a sealed payload.
    ///
    /// Fails with `CryptoError::Integrity` on any malformed field or tag
    /// mismatch; partial plaintext is never returned.
    pub fn open(
        &self,
        master: &MasterKey,
        aad: &[u8],
        sealed: &SealedPayload,
    ) -> Result<Vec<u8>, CryptoError> {
        let iv = decode_fixed::<IV_LEN>("iv", &sealed.iv)?;
        let salt = decode_fixed::<SALT_LEN>("salt", &sealed.salt)?;
        let ciphertext = hex::decode(&sealed.ciphertext)
            .map_err(|_| CryptoError::Integrity("ciphertext is not valid hex".to_string()))?;
        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::Integrity(
                "ciphertext shorter than tag".to_string(),
            ));
        }

        let record_key = self.derive_record_key(master, &salt);
        let cipher =
            Aes256Gcm128::new_from_slice(&record_key.0).map_err(|_| CryptoError::Seal)?;
        cipher
            .decrypt(
                Nonce::<U16>::from_slice(&iv),
                Payload {
                    msg: &ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::Integrity("authentication tag mismatch".to_string()))
    }

    fn derive_record_key(&self, master: &MasterKey, salt: &[u8]) -> RecordKeyMaterial {
        let mut out = RecordKeyMaterial([0u8; RECORD_KEY_LEN]);
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            self.iterations,
            salt,
            master.as_bytes(),
            &mut out.0,
        );
        out
    }
}

impl Default for EncryptionEngine {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ITERATIONS)
    }
}

/// Decode a lowercase/uppercase hex field of exactly `N` bytes.
fn decode_fixed<const N: usize>(field: &str, value: &str) -> Result<[u8; N], CryptoError> {
    if value.len() != N * 2 {
        return Err(CryptoError::Integrity(format!(
            "{field} must be {} hex characters",
            N * 2
        )));
    }
    let raw = hex::decode(value)
        .map_err(|_| CryptoError::Integrity(format!("{field} is not valid hex")))?;
    raw.as_slice()
        .try_into()
        .map_err(|_| CryptoError::Integrity(format!("{field} has wrong length")))
}
