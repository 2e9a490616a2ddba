// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Master key manager.
//!
//! One 256-bit key per installation, stored hex-encoded in the credential
//! vault under [`MASTER_KEY_ENTRY`]. The first call to
//! [`MasterKeyManager::get_or_create_master_key`] loads it (or generates and
//! persists it on first run); the result is cached for the process lifetime.
//!
//! A stored value that does not decode is reported as unavailable and left
//! untouched. Overwriting it would orphan every record sealed under it.

use std::fmt;
use std::sync::Arc;

use ring::rand::{SecureRandom, SystemRandom};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::{run_blocking, StoreError, StoreResult};
use crate::vault::CredentialVault;

/// Vault entry holding the hex-encoded master key.
pub const MASTER_KEY_ENTRY: &str = "health_vault_master_key";

/// Master key length in bytes.
pub const MASTER_KEY_LEN: usize = 32;

/// The per-installation symmetric secret.
///
/// Not `Clone`; shared through `Arc`. Zeroed on drop.
pub struct MasterKey {
    bytes: [u8; MASTER_KEY_LEN],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; MASTER_KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; MASTER_KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes = [0u8; MASTER_KEY_LEN];
    }
}

/// Owns the master key lifecycle against a credential vault.
pub struct MasterKeyManager {
    vault: Arc<dyn CredentialVault>,
    rng: SystemRandom,
    cached: OnceCell<Arc<MasterKey>>,
}

impl MasterKeyManager {
    pub fn new(vault: Arc<dyn CredentialVault>) -> Self {
        Self {
            vault,
            rng: SystemRandom::new(),
            cached: OnceCell::new(),
        }
    }

    /// Return the installation's master key, creating it on first run.
    ///
    /// # Errors
    /// `StoreError::KeyUnavailable` when the vault cannot be read or written,
    /// the random source fails, or the stored key is malformed.
    pub async fn get_or_create_master_key(&self) -> StoreResult<Arc<MasterKey>> {
        let key = self
            .cached
            .get_or_try_init(|| {
                let vault = Arc::clone(&self.vault);
                let rng = self.rng.clone();
                async move { run_blocking(move || load_or_create(vault.as_ref(), &rng)).await }
            })
            .await?;
        Ok(Arc::clone(key))
    }
}

fn load_or_create(vault: &dyn CredentialVault, rng: &SystemRandom) -> StoreResult<Arc<MasterKey>> {
    let stored = vault
        .get(MASTER_KEY_ENTRY)
        .map_err(|e| StoreError::KeyUnavailable(e.to_string()))?;

    if let Some(encoded) = stored {
        let key = decode_key(&encoded).ok_or_else(|| {
            warn!("Stored master key is malformed; refusing to replace it");
            StoreError::KeyUnavailable("stored master key is malformed".to_string())
        })?;
        return Ok(Arc::new(key));
    }

    let mut bytes = [0u8; MASTER_KEY_LEN];
    rng.fill(&mut bytes)
        .map_err(|_| StoreError::KeyUnavailable("secure random source failed".to_string()))?;
    let key = MasterKey::from_bytes(bytes);
    bytes.fill(0);

    vault
        .set(MASTER_KEY_ENTRY, hex::encode(key.as_bytes()).as_bytes())
        .map_err(|e| StoreError::KeyUnavailable(e.to_string()))?;
    info!("Generated new installation master key");
    Ok(Arc::new(key))
}

fn decode_key(encoded: &[u8]) -> Option<MasterKey> {
    let text = std::str::from_utf8(encoded).ok()?;
    let raw = hex::decode(text.trim()).ok()?;
    let bytes: [u8; MASTER_KEY_LEN] = raw.as_slice().try_into().ok()?;
    Some(MasterKey::from_bytes(bytes))
}
