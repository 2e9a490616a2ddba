// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Health Data Store
//!
//! The explicit store handle. Created once at process start with
//! [`HealthDataStore::initialize`], shared by reference (`Arc`) with every
//! consumer, and released with [`HealthDataStore::shutdown`].
//!
//! ## Startup
//!
//! 1. Validate the policy table (the only fatal check)
//! 2. Load the master key; open the record engine (or fall back)
//! 3. Open the LOCAL tier
//! 4. Run the legacy migration
//! 5. Open the router gate
//!
//! Everything after step 1 degrades instead of failing: a missing key locks
//! the SECURE tier, a broken engine selects fallback mode, a failed
//! migration is logged and retried on next launch.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::crypto::{EncryptionEngine, MasterKeyManager};
use crate::error::{run_blocking, StoreError, StoreResult};
use crate::migration::{MigrationCoordinator, MigrationReport};
use crate::models::{
    validate_id, DataType, HealthEntry, RecordKey, RecordScope, StoreMode, StoreStats,
};
use crate::policy::PolicyTable;
use crate::retention::{self, RetentionReport};
use crate::router::{SyncClient, TierRouter};
use crate::secure::{OpenedRecord, SecureStore};
use crate::storage::{KeyedLocks, LegacyStore, LocalTier, StoragePaths};
use crate::vault::CredentialVault;

/// Record id of a user's consent flags (`preferences` type).
pub const CONSENT_RECORD_ID: &str = "consents";

/// Platform collaborators the store is built on.
pub struct StoreDependencies {
    pub vault: Arc<dyn CredentialVault>,
    pub legacy: Arc<dyn LegacyStore>,
    pub sync: Arc<dyn SyncClient>,
}

pub struct HealthDataStore {
    router: Arc<TierRouter>,
    secure: Arc<SecureStore>,
    migration: Option<MigrationReport>,
    consent_locks: KeyedLocks<String>,
}

impl HealthDataStore {
    /// Build the store with the standard policy table.
    pub async fn initialize(config: &StoreConfig, deps: StoreDependencies) -> StoreResult<Self> {
        Self::initialize_with_policies(config, deps, PolicyTable::standard()).await
    }

    /// Build the store with a caller-supplied policy table.
    ///
    /// # Errors
    /// `PolicyViolation` if the table breaks a routing invariant. No other
    /// failure prevents startup.
    pub async fn initialize_with_policies(
        config: &StoreConfig,
        deps: StoreDependencies,
        policies: PolicyTable,
    ) -> StoreResult<Self> {
        let policies = policies.with_whitelist(config.default_route_whitelist.iter().cloned());
        policies.validate()?;

        let paths = StoragePaths::new(&config.data_dir);
        let keys = MasterKeyManager::new(Arc::clone(&deps.vault));
        let engine = EncryptionEngine::new(config.kdf_iterations);

        let secure = Arc::new(
            SecureStore::open(
                &paths.records_db(),
                config.record_cache_bytes,
                Arc::clone(&deps.vault),
                &keys,
                engine,
            )
            .await,
        );

        let local_path = paths.local_db();
        let capacity = config.local_cache_capacity;
        let local = match run_blocking(move || Ok(LocalTier::open(&local_path, capacity))).await {
            Ok(local) => local,
            Err(e) => {
                warn!(error = %e, "Local tier open task failed, running memory-only");
                LocalTier::in_memory(capacity)
            }
        };

        let router = Arc::new(TierRouter::new(
            policies,
            Arc::clone(&secure),
            Arc::new(local),
            deps.sync,
            config.device_user.clone(),
        ));

        let mode = secure.mode().await;
        // In Locked mode SECURE keys stay behind and the flag stays unset.
        let coordinator = MigrationCoordinator::new(deps.vault, deps.legacy);
        let migration = match coordinator.migrate_once(&router).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Legacy migration could not run; will retry next launch");
                None
            }
        };
        router.open_gate();

        info!(
            mode = %mode,
            data_dir = %config.data_dir.display(),
            migrated = migration.as_ref().map(|m| m.migrated).unwrap_or(0),
            skipped = migration.as_ref().map(|m| m.skipped.len()).unwrap_or(0),
            "Health data store initialized"
        );

        Ok(Self {
            router,
            secure,
            migration,
            consent_locks: KeyedLocks::new(),
        })
    }

    /// Encrypt and store `data`. Generates a UUID when `id` is `None`.
    /// Returns the record id.
    pub async fn store_health_data(
        &self,
        user_id: &str,
        data_type: DataType,
        data: &Value,
        id: Option<&str>,
    ) -> StoreResult<String> {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let key = RecordKey::new(user_id, data_type, id.as_str())?;
        let plaintext = serde_json::to_vec(data)?;
        self.secure.put(key, plaintext).await?;
        Ok(id)
    }

    /// Decrypted records of `(user_id, data_type)`, newest first, or the
    /// single record `id`.
    pub async fn get_health_data(
        &self,
        user_id: &str,
        data_type: DataType,
        id: Option<&str>,
    ) -> StoreResult<Vec<HealthEntry>> {
        validate_id("user_id", user_id)?;
        let opened = self.secure.get(user_id, data_type, id).await?;
        Ok(opened.into_iter().map(to_entry).collect())
    }

    /// Delete a user's records, optionally narrowed to a type or one record.
    pub async fn delete_health_data(
        &self,
        user_id: &str,
        data_type: Option<DataType>,
        id: Option<&str>,
    ) -> StoreResult<u64> {
        let scope = RecordScope::from_parts(user_id, data_type, id)?;
        let removed = self.secure.delete(scope).await?;
        info!(user_id, data_type = ?data_type, removed, "Deleted health data");
        Ok(removed)
    }

    /// Whether `flag` is granted in the user's consent record. Missing or
    /// unreadable consent counts as not granted.
    pub async fn has_consent(&self, user_id: &str, flag: &str) -> StoreResult<bool> {
        let consents = self.read_consents(user_id).await?;
        Ok(consents.get(flag).and_then(Value::as_bool).unwrap_or(false))
    }

    /// Grant or revoke one consent flag.
    pub async fn set_consent(&self, user_id: &str, flag: &str, granted: bool) -> StoreResult<()> {
        if flag.is_empty() {
            return Err(StoreError::InvalidInput("consent flag must not be empty".to_string()));
        }
        let _writer = self.consent_locks.lock(user_id.to_string()).await;
        let mut consents = self.read_consents(user_id).await?;
        consents.insert(flag.to_string(), Value::Bool(granted));
        self.store_health_data(
            user_id,
            DataType::Preferences,
            &Value::Object(consents),
            Some(CONSENT_RECORD_ID),
        )
        .await?;
        Ok(())
    }

    async fn read_consents(&self, user_id: &str) -> StoreResult<Map<String, Value>> {
        let entries = match self
            .get_health_data(user_id, DataType::Preferences, Some(CONSENT_RECORD_ID))
            .await
        {
            Ok(entries) => entries,
            Err(StoreError::Integrity(msg)) => {
                warn!(user_id, error = %msg, "Consent record unreadable, treating as empty");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        Ok(entries
            .into_iter()
            .next()
            .and_then(|e| match e.data {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .unwrap_or_default())
    }

    pub async fn stats(&self) -> StoreResult<StoreStats> {
        self.secure.stats().await
    }

    pub async fn mode(&self) -> StoreMode {
        self.secure.mode().await
    }

    /// Tier router for logical-key access.
    pub fn router(&self) -> &Arc<TierRouter> {
        &self.router
    }

    /// Result of this launch's migration run, if it ran.
    pub fn migration_report(&self) -> Option<&MigrationReport> {
        self.migration.as_ref()
    }

    /// Delete everything past its category's retention period.
    pub async fn enforce_retention(&self) -> StoreResult<RetentionReport> {
        retention::sweep(&self.router, chrono::Utc::now().timestamp_millis()).await
    }

    /// Probe the SECURE backend.
    pub async fn health_check(&self) -> StoreResult<()> {
        self.secure.health_check().await
    }

    /// Wait for in-flight operations, then close the store.
    pub async fn shutdown(&self) {
        self.secure.close().await;
        info!("Health data store shut down");
    }
}

fn to_entry(opened: OpenedRecord) -> HealthEntry {
    let data = serde_json::from_slice(&opened.plaintext)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&opened.plaintext).into_owned()));
    HealthEntry {
        id: opened.record.id,
        data_type: opened.record.data_type,
        data,
        created_at: opened.record.created_at,
        updated_at: opened.record.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MASTER_KEY_ENTRY;
    use crate::migration::MIGRATION_FLAG_ENTRY;
    use crate::policy::{Category, StoragePolicy, Tier};
    use crate::router::NoopSyncClient;
    use crate::storage::MemoryLegacyStore;
    use crate::vault::MemoryVault;
    use serde_json::json;

    fn config(dir: &std::path::Path) -> StoreConfig {
        let mut config = StoreConfig::for_dir(dir);
        config.kdf_iterations = 10;
        config.record_cache_bytes = 1 << 20;
        config
    }

    fn deps(vault: Arc<MemoryVault>, legacy: Arc<MemoryLegacyStore>) -> StoreDependencies {
        StoreDependencies {
            vault,
            legacy,
            sync: Arc::new(NoopSyncClient),
        }
    }

    async fn store(dir: &std::path::Path) -> HealthDataStore {
        HealthDataStore::initialize(
            &config(dir),
            deps(Arc::new(MemoryVault::new()), Arc::new(MemoryLegacyStore::new())),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn profile_round_trip_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        let data = json!({"ageRange": "25-34"});

        let id = store
            .store_health_data("u1", DataType::HealthProfile, &data, None)
            .await
            .unwrap();
        assert!(Uuid::parse_str(&id).is_ok());

        let got = store
            .get_health_data("u1", DataType::HealthProfile, Some(&id))
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].data, data);

        let removed = store
            .delete_health_data("u1", Some(DataType::HealthProfile), Some(&id))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store
            .get_health_data("u1", DataType::HealthProfile, Some(&id))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn rewriting_an_id_keeps_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;

        store
            .store_health_data("u1", DataType::StackItem, &json!({"name": "zinc"}), Some("s1"))
            .await
            .unwrap();
        let first = store
            .get_health_data("u1", DataType::StackItem, Some("s1"))
            .await
            .unwrap()
            .remove(0);
        store
            .store_health_data("u1", DataType::StackItem, &json!({"name": "zinc", "dose": 2}), Some("s1"))
            .await
            .unwrap();

        let all = store
            .get_health_data("u1", DataType::StackItem, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].created_at, first.created_at);
        assert!(all[0].updated_at > first.updated_at);
        assert_eq!(all[0].data["dose"], 2);
    }

    #[tokio::test]
    async fn listing_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        for id in ["a", "b", "c"] {
            store
                .store_health_data("u1", DataType::ScanHistory, &json!({"id": id}), Some(id))
                .await
                .unwrap();
        }
        store
            .store_health_data("u1", DataType::ScanHistory, &json!({"id": "a"}), Some("a"))
            .await
            .unwrap();

        let all = store
            .get_health_data("u1", DataType::ScanHistory, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, "a");
        assert!(all.windows(2).all(|w| w[0].updated_at >= w[1].updated_at));
    }

    #[tokio::test]
    async fn scoped_deletion_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        for (t, id) in [
            (DataType::StackItem, "a"),
            (DataType::StackItem, "b"),
            (DataType::ScanHistory, "c"),
        ] {
            store.store_health_data("u1", t, &json!(1), Some(id)).await.unwrap();
        }
        store
            .store_health_data("u2", DataType::StackItem, &json!(1), Some("a"))
            .await
            .unwrap();

        assert_eq!(
            store.delete_health_data("u1", Some(DataType::StackItem), None).await.unwrap(),
            2
        );
        assert_eq!(store.delete_health_data("u1", None, None).await.unwrap(), 1);
        assert!(store.delete_health_data("u1", None, Some("a")).await.is_err());
        assert_eq!(store.stats().await.unwrap().total_records, 1);
    }

    #[tokio::test]
    async fn consent_flags() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        assert!(!store.has_consent("u1", "analytics").await.unwrap());

        store.set_consent("u1", "analytics", true).await.unwrap();
        store.set_consent("u1", "research", false).await.unwrap();
        assert!(store.has_consent("u1", "analytics").await.unwrap());
        assert!(!store.has_consent("u1", "research").await.unwrap());
        assert!(!store.has_consent("u2", "analytics").await.unwrap());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.by_type.get(&DataType::Preferences), Some(&1));
    }

    #[tokio::test]
    async fn tampered_records_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        store
            .store_health_data("u1", DataType::StackItem, &json!("ok"), Some("good"))
            .await
            .unwrap();
        store
            .store_health_data("u1", DataType::StackItem, &json!("bad"), Some("bad"))
            .await
            .unwrap();

        let records = store.secure.record_store().await.unwrap();
        let db = records.db().unwrap();
        let key = RecordKey::new("u1", DataType::StackItem, "bad").unwrap();
        let original = db.get(&key).unwrap().unwrap();

        for field in 0..3 {
            let mut tampered = original.clone();
            let target = match field {
                0 => &mut tampered.ciphertext,
                1 => &mut tampered.iv,
                _ => &mut tampered.salt,
            };
            let flipped = if target.starts_with('f') { "0" } else { "f" };
            target.replace_range(0..1, flipped);
            db.overwrite_raw(&tampered).unwrap();

            let listed = store
                .get_health_data("u1", DataType::StackItem, None)
                .await
                .unwrap();
            assert_eq!(listed.len(), 1, "field {field}");
            assert_eq!(listed[0].id, "good");
        }
    }

    #[tokio::test]
    async fn migration_runs_once_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(MemoryVault::new());
        let legacy = Arc::new(MemoryLegacyStore::with_entries([
            ("health_profile", r#"{"ageRange":"25-34"}"#),
            ("onboarding_complete", "true"),
            ("medical_notes", "left behind"),
        ]));

        let first = HealthDataStore::initialize(&config(dir.path()), deps(vault.clone(), legacy.clone()))
            .await
            .unwrap();
        let report = first.migration_report().unwrap().clone();
        assert_eq!(report.migrated, 2);
        assert_eq!(report.skipped, vec!["medical_notes"]);
        assert_eq!(
            first.router().read("health_profile").await.unwrap().as_deref(),
            Some(&br#"{"ageRange":"25-34"}"#[..])
        );
        let stats_after_first = first.stats().await.unwrap();
        first.shutdown().await;
        drop(first);

        let second = HealthDataStore::initialize(&config(dir.path()), deps(vault.clone(), legacy.clone()))
            .await
            .unwrap();
        assert_eq!(second.migration_report(), Some(&MigrationReport::default()));
        assert_eq!(second.stats().await.unwrap(), stats_after_first);
        assert_eq!(legacy.len(), 1);
    }

    #[tokio::test]
    async fn fallback_mode_keeps_single_record_access() {
        let dir = tempfile::tempdir().unwrap();
        // A directory squatting on the record file forces the engine to fail.
        std::fs::create_dir_all(dir.path().join("records.redb")).unwrap();
        let vault = Arc::new(MemoryVault::new());
        let store = HealthDataStore::initialize(
            &config(dir.path()),
            deps(vault.clone(), Arc::new(MemoryLegacyStore::new())),
        )
        .await
        .unwrap();
        assert_eq!(store.mode().await, StoreMode::Fallback);

        let data = json!({"ageRange": "25-34"});
        let id = store
            .store_health_data("u1", DataType::HealthProfile, &data, Some("p1"))
            .await
            .unwrap();
        let got = store
            .get_health_data("u1", DataType::HealthProfile, Some(&id))
            .await
            .unwrap();
        assert_eq!(got[0].data, data);
        assert!(store
            .get_health_data("u1", DataType::HealthProfile, None)
            .await
            .unwrap()
            .is_empty());

        // Still sealed in the vault, never plaintext.
        let raw = vault.get("health_data_u1_health_profile_p1").unwrap().unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("25-34"));
        store.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn locked_mode_still_starts() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(MemoryVault::new());
        vault.set_unavailable(true);
        let legacy = Arc::new(MemoryLegacyStore::with_entries([("theme", "dark")]));
        let store = HealthDataStore::initialize(&config(dir.path()), deps(vault, legacy.clone()))
            .await
            .unwrap();

        assert_eq!(store.mode().await, StoreMode::Locked);
        assert!(store.migration_report().is_none());
        assert_eq!(legacy.len(), 1);
        assert!(matches!(
            store
                .store_health_data("u1", DataType::HealthProfile, &json!({}), None)
                .await,
            Err(StoreError::KeyUnavailable(_))
        ));
        // Non-PHI routing keeps working.
        store.router().write("theme", b"light").await.unwrap();
    }

    #[tokio::test]
    async fn locked_mode_moves_non_phi_keys_and_defers_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(MemoryVault::new());
        vault.set(MASTER_KEY_ENTRY, b"not-a-key").unwrap();
        let legacy = Arc::new(MemoryLegacyStore::with_entries([
            ("health_profile", r#"{"ageRange":"25-34"}"#),
            ("theme", "dark"),
        ]));
        let store = HealthDataStore::initialize(&config(dir.path()), deps(vault.clone(), legacy.clone()))
            .await
            .unwrap();

        assert_eq!(store.mode().await, StoreMode::Locked);
        let report = store.migration_report().unwrap();
        assert_eq!(report.migrated, 1);
        assert_eq!(report.skipped, vec!["health_profile"]);
        assert_eq!(store.router().read("theme").await.unwrap().as_deref(), Some(&b"dark"[..]));
        assert_eq!(legacy.len(), 1);
        assert!(vault.get(MIGRATION_FLAG_ENTRY).unwrap().is_none());
    }

    #[tokio::test]
    async fn phi_policy_on_local_tier_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let policies = PolicyTable::standard().with_override(
            Category::StackItems,
            StoragePolicy {
                tier: Tier::Local,
                encrypt: false,
                sync: false,
                retention_days: None,
            },
        );
        let result = HealthDataStore::initialize_with_policies(
            &config(dir.path()),
            deps(Arc::new(MemoryVault::new()), Arc::new(MemoryLegacyStore::new())),
            policies,
        )
        .await;
        assert!(matches!(result, Err(StoreError::PolicyViolation(_))));
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        store.shutdown().await;
        assert_eq!(store.mode().await, StoreMode::Closed);
        assert!(matches!(
            store.get_health_data("u1", DataType::StackItem, None).await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
