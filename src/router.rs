// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Tier Router
//!
//! Dispatches logical keys to the tier their policy names:
//!
//! - `SECURE`: sealed into the record store as the device user's record,
//!   record id = full logical key
//! - `LOCAL`: plaintext into the local tier
//! - `CLOUD`: plaintext into the local tier, then offered to the
//!   [`SyncClient`]; the router itself never touches the network
//!
//! Every routed call waits for the migration gate to open, so nothing reads
//! through the new path before legacy entries have been moved into it.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{run_blocking, StoreError, StoreResult};
use crate::models::{RecordKey, RecordScope};
use crate::policy::{PolicyTable, Route, Tier};
use crate::secure::SecureStore;
use crate::storage::LocalTier;

/// Seam to the external cloud-sync collaborator.
///
/// Calls must not block; implementations queue work for their own I/O.
pub trait SyncClient: Send + Sync {
    /// A sync-eligible value was written.
    fn offer(&self, key: &str, value: &[u8]);

    /// A sync-eligible value was removed.
    fn withdraw(&self, key: &str);
}

/// Sync client that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSyncClient;

impl SyncClient for NoopSyncClient {
    fn offer(&self, key: &str, _value: &[u8]) {
        debug!(key, "Sync disabled, offer dropped");
    }

    fn withdraw(&self, key: &str) {
        debug!(key, "Sync disabled, withdrawal dropped");
    }
}

pub struct TierRouter {
    policies: PolicyTable,
    secure: Arc<SecureStore>,
    local: Arc<LocalTier>,
    sync: Arc<dyn SyncClient>,
    owner: String,
    gate: watch::Sender<bool>,
}

impl TierRouter {
    /// Build a router with its gate closed.
    pub fn new(
        policies: PolicyTable,
        secure: Arc<SecureStore>,
        local: Arc<LocalTier>,
        sync: Arc<dyn SyncClient>,
        owner: impl Into<String>,
    ) -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            policies,
            secure,
            local,
            sync,
            owner: owner.into(),
            gate,
        }
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub(crate) fn secure(&self) -> &Arc<SecureStore> {
        &self.secure
    }

    pub(crate) fn local(&self) -> &Arc<LocalTier> {
        &self.local
    }

    /// User id SECURE entries are stored under.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Release callers waiting on migration.
    pub(crate) fn open_gate(&self) {
        self.gate.send_replace(true);
        info!("Tier router accepting requests");
    }

    pub fn is_open(&self) -> bool {
        *self.gate.borrow()
    }

    async fn wait_for_gate(&self) -> StoreResult<()> {
        let mut rx = self.gate.subscribe();
        rx.wait_for(|open| *open)
            .await
            .map(|_| ())
            .map_err(|_| StoreError::Unavailable("router gate dropped".to_string()))
    }

    /// Category and policy a key resolves to.
    pub fn route(&self, key: &str) -> StoreResult<Route> {
        self.policies.resolve(key)
    }

    pub async fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.wait_for_gate().await?;
        let route = self.route(key)?;
        match route.policy.tier {
            Tier::Secure => {
                let record_key = self.record_key(&route, key)?;
                let found = self
                    .secure
                    .get(&record_key.user_id, record_key.data_type, Some(record_key.id.as_str()))
                    .await?;
                Ok(found.into_iter().next().map(|r| r.plaintext))
            }
            Tier::Local | Tier::Cloud => {
                let local = Arc::clone(&self.local);
                let key = key.to_string();
                run_blocking(move || Ok(local.get(&key)?)).await
            }
        }
    }

    pub async fn write(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.wait_for_gate().await?;
        self.write_ungated(key, value).await
    }

    /// Write without waiting for the gate. Only migration may call this.
    pub(crate) async fn write_ungated(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let route = self.route(key)?;
        match route.policy.tier {
            Tier::Secure => {
                let record_key = self.record_key(&route, key)?;
                self.secure.put(record_key, value.to_vec()).await?;
            }
            Tier::Local | Tier::Cloud => {
                let local = Arc::clone(&self.local);
                let owned_key = key.to_string();
                let owned_value = value.to_vec();
                let now = chrono::Utc::now().timestamp_millis();
                run_blocking(move || Ok(local.put(&owned_key, &owned_value, now)?)).await?;
                if route.policy.sync {
                    self.sync.offer(key, value);
                }
            }
        }
        debug!(key, tier = %route.policy.tier, category = %route.category, "Routed write");
        Ok(())
    }

    /// Remove a key. Returns whether anything was removed.
    pub async fn remove(&self, key: &str) -> StoreResult<bool> {
        self.wait_for_gate().await?;
        let route = self.route(key)?;
        match route.policy.tier {
            Tier::Secure => {
                let record_key = self.record_key(&route, key)?;
                let removed = self.secure.delete(RecordScope::Record(record_key)).await?;
                Ok(removed > 0)
            }
            Tier::Local | Tier::Cloud => {
                let local = Arc::clone(&self.local);
                let owned_key = key.to_string();
                let removed = run_blocking(move || Ok(local.remove(&owned_key)?)).await?;
                if route.policy.sync {
                    self.sync.withdraw(key);
                }
                Ok(removed)
            }
        }
    }

    fn record_key(&self, route: &Route, key: &str) -> StoreResult<RecordKey> {
        let data_type = route.category.data_type().ok_or_else(|| {
            StoreError::PolicyViolation(format!(
                "category {} routes to SECURE without a record type",
                route.category
            ))
        })?;
        RecordKey::new(self.owner.as_str(), data_type, key)
    }
}
