// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Legacy Migration
//!
//! One-time transfer of the legacy plaintext key-value store into the tiered
//! store.
//!
//! ## Algorithm
//!
//! 1. If the completion flag is set in the vault, do nothing.
//! 2. For every legacy key: route it through the tier router (sealing PHI),
//!    and only after the write succeeds remove the legacy copy.
//! 3. A key that fails at any step keeps its legacy copy and is reported as
//!    skipped; the run continues with the next key.
//! 4. Set the completion flag once the enumeration has finished, unless a
//!    key failed because the master key is unavailable. Those keys are
//!    retried on the next launch; keys for other tiers still move now.
//!
//! A crash before step 4 re-runs the migration on next launch. Keys already
//! moved are gone from the legacy store, and a key written but not yet
//! removed is rewritten by the same upsert.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{run_blocking, StoreError, StoreResult};
use crate::router::TierRouter;
use crate::storage::LegacyStore;
use crate::vault::CredentialVault;

/// Vault entry recording that migration has completed.
pub const MIGRATION_FLAG_ENTRY: &str = "health_vault_legacy_migrated";

/// Outcome of one migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub migrated: usize,
    pub skipped: Vec<String>,
}

impl MigrationReport {
    /// `MigrationPartialFailure` if any key was skipped.
    pub fn into_result(self) -> StoreResult<Self> {
        if self.skipped.is_empty() {
            Ok(self)
        } else {
            Err(StoreError::MigrationPartialFailure {
                skipped: self.skipped,
            })
        }
    }
}

pub struct MigrationCoordinator {
    vault: Arc<dyn CredentialVault>,
    legacy: Arc<dyn LegacyStore>,
}

impl MigrationCoordinator {
    pub fn new(vault: Arc<dyn CredentialVault>, legacy: Arc<dyn LegacyStore>) -> Self {
        Self { vault, legacy }
    }

    /// Whether the completion flag is set.
    pub async fn is_complete(&self) -> StoreResult<bool> {
        let vault = Arc::clone(&self.vault);
        run_blocking(move || Ok(vault.get(MIGRATION_FLAG_ENTRY)?.is_some())).await
    }

    /// Run the migration unless it has already completed.
    ///
    /// # Errors
    /// Fails only when the flag cannot be read or the legacy store cannot be
    /// enumerated; per-key failures are reported in the result.
    pub async fn migrate_once(&self, router: &TierRouter) -> StoreResult<MigrationReport> {
        if self.is_complete().await? {
            return Ok(MigrationReport::default());
        }

        let legacy = Arc::clone(&self.legacy);
        let keys = run_blocking(move || Ok(legacy.keys()?)).await?;
        info!(count = keys.len(), "Migrating legacy entries");

        let mut report = MigrationReport::default();
        let mut deferred = false;
        for key in keys {
            match self.migrate_key(router, &key).await {
                Ok(true) => report.migrated += 1,
                Ok(false) => {}
                Err(e) => {
                    deferred |= matches!(e, StoreError::KeyUnavailable(_));
                    warn!(key = %key, error = %e, "Legacy entry left in place");
                    report.skipped.push(key);
                }
            }
        }

        if deferred {
            warn!("Master key unavailable; migration will re-run on next launch");
        } else {
            let vault = Arc::clone(&self.vault);
            if let Err(e) = run_blocking(move || Ok(vault.set(MIGRATION_FLAG_ENTRY, b"1")?)).await {
                warn!(error = %e, "Could not record migration completion; it will re-run");
            }
        }

        if report.skipped.is_empty() {
            info!(migrated = report.migrated, "Legacy migration complete");
        } else {
            warn!(
                migrated = report.migrated,
                skipped = ?report.skipped,
                "Legacy migration finished with skipped keys"
            );
        }
        Ok(report)
    }

    /// Move one key. `Ok(false)` when the key vanished before it was read.
    async fn migrate_key(&self, router: &TierRouter, key: &str) -> StoreResult<bool> {
        let legacy = Arc::clone(&self.legacy);
        let owned = key.to_string();
        let Some(value) = run_blocking(move || Ok(legacy.get(&owned)?)).await? else {
            return Ok(false);
        };

        router.write_ungated(key, value.as_bytes()).await?;

        let legacy = Arc::clone(&self.legacy);
        let owned = key.to_string();
        run_blocking(move || Ok(legacy.remove(&owned)?)).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{EncryptionEngine, MasterKeyManager};
    use crate::models::DataType;
    use crate::policy::PolicyTable;
    use crate::router::NoopSyncClient;
    use crate::secure::SecureStore;
    use crate::storage::{LocalTier, MemoryLegacyStore};
    use crate::vault::MemoryVault;

    async fn router(dir: &std::path::Path, vault: Arc<MemoryVault>) -> TierRouter {
        let keys = MasterKeyManager::new(vault.clone());
        let secure = SecureStore::open(
            &dir.join("records.redb"),
            1 << 20,
            vault,
            &keys,
            EncryptionEngine::new(10),
        )
        .await;
        TierRouter::new(
            PolicyTable::standard(),
            Arc::new(secure),
            Arc::new(LocalTier::in_memory(16)),
            Arc::new(NoopSyncClient),
            "device",
        )
    }

    #[tokio::test]
    async fn migrates_every_key_then_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(MemoryVault::new());
        let router = router(dir.path(), vault.clone()).await;
        let legacy = Arc::new(MemoryLegacyStore::with_entries([
            ("health_profile", r#"{"ageRange":"25-34"}"#),
            ("theme", "dark"),
        ]));
        let coordinator = MigrationCoordinator::new(vault.clone(), legacy.clone());

        let first = coordinator.migrate_once(&router).await.unwrap();
        assert_eq!(first.migrated, 2);
        assert!(first.skipped.is_empty());
        assert!(legacy.is_empty());
        assert!(coordinator.is_complete().await.unwrap());

        router.open_gate();
        assert_eq!(
            router.read("health_profile").await.unwrap().as_deref(),
            Some(&br#"{"ageRange":"25-34"}"#[..])
        );
        assert_eq!(router.read("theme").await.unwrap().as_deref(), Some(&b"dark"[..]));

        let second = coordinator.migrate_once(&router).await.unwrap();
        assert_eq!(second, MigrationReport::default());
    }

    #[tokio::test]
    async fn failing_keys_stay_behind_and_do_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(MemoryVault::new());
        let router = router(dir.path(), vault.clone()).await;
        let legacy = Arc::new(MemoryLegacyStore::with_entries([
            ("medical_notes", "unroutable"),
            ("theme", "dark"),
            ("user_stack", "[]"),
        ]));
        legacy.fail_reads_of("user_stack");
        let coordinator = MigrationCoordinator::new(vault.clone(), legacy.clone());

        let report = coordinator.migrate_once(&router).await.unwrap();
        assert_eq!(report.migrated, 1);
        assert_eq!(report.skipped, vec!["medical_notes", "user_stack"]);
        assert_eq!(legacy.len(), 2);
        assert!(coordinator.is_complete().await.unwrap());

        assert!(matches!(
            report.into_result(),
            Err(StoreError::MigrationPartialFailure { skipped }) if skipped.len() == 2
        ));
    }

    #[tokio::test]
    async fn key_written_but_not_removed_is_rewritten_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(MemoryVault::new());
        let router = router(dir.path(), vault.clone()).await;
        let profile = r#"{"ageRange":"25-34"}"#;
        let legacy = Arc::new(MemoryLegacyStore::with_entries([("health_profile", profile)]));
        legacy.fail_removes_of("health_profile");
        let coordinator = MigrationCoordinator::new(vault.clone(), legacy.clone());

        let first = coordinator.migrate_once(&router).await.unwrap();
        assert_eq!(first.migrated, 0);
        assert_eq!(first.skipped, vec!["health_profile"]);
        assert_eq!(legacy.len(), 1);

        let secure = router.secure();
        let before = secure
            .get("device", DataType::HealthProfile, None)
            .await
            .unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].plaintext, profile.as_bytes());

        // Same state as a crash between the write and the legacy removal.
        vault.delete(MIGRATION_FLAG_ENTRY).unwrap();
        legacy.clear_failures();

        let second = coordinator.migrate_once(&router).await.unwrap();
        assert_eq!(second.migrated, 1);
        assert!(second.skipped.is_empty());
        assert!(legacy.is_empty());

        let after = secure
            .get("device", DataType::HealthProfile, None)
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].plaintext, profile.as_bytes());
        assert_eq!(after[0].record.id, before[0].record.id);
        assert_eq!(after[0].record.created_at, before[0].record.created_at);
    }

    #[tokio::test]
    async fn unreadable_legacy_store_leaves_flag_unset() {
        struct Broken;
        impl LegacyStore for Broken {
            fn keys(&self) -> crate::storage::LegacyResult<Vec<String>> {
                Err(crate::storage::LegacyError::Unavailable("gone".into()))
            }
            fn get(&self, _key: &str) -> crate::storage::LegacyResult<Option<String>> {
                Ok(None)
            }
            fn remove(&self, _key: &str) -> crate::storage::LegacyResult<()> {
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(MemoryVault::new());
        let router = router(dir.path(), vault.clone()).await;
        let coordinator = MigrationCoordinator::new(vault.clone(), Arc::new(Broken));

        assert!(coordinator.migrate_once(&router).await.is_err());
        assert!(!coordinator.is_complete().await.unwrap());
    }
}
