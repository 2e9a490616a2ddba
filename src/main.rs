// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use health_vault::api::router;
use health_vault::config::StoreConfig;
use health_vault::logging::{init_tracing, LogFormat};
use health_vault::retention::RetentionSweeper;
use health_vault::router::NoopSyncClient;
use health_vault::state::AppState;
use health_vault::storage::{FileLegacyStore, StoragePaths};
use health_vault::store::{HealthDataStore, StoreDependencies};
use health_vault::vault::{CredentialVault, FileVault, MemoryVault};

#[tokio::main]
async fn main() {
    init_tracing(LogFormat::from_env()).expect("Failed to install tracing subscriber");

    let config = StoreConfig::from_env();
    let paths = StoragePaths::new(&config.data_dir);

    // Without a usable vault the store runs on an ephemeral one: nothing
    // sealed survives the process, but startup never fails.
    let vault: Arc<dyn CredentialVault> = match FileVault::open(&config.vault_dir) {
        Ok(vault) => Arc::new(vault),
        Err(e) => {
            error!(vault_dir = %config.vault_dir.display(), error = %e, "Credential vault unavailable, using ephemeral vault");
            Arc::new(MemoryVault::new())
        }
    };

    let deps = StoreDependencies {
        vault,
        legacy: Arc::new(FileLegacyStore::new(paths.legacy_store())),
        sync: Arc::new(NoopSyncClient),
    };

    let store = Arc::new(
        HealthDataStore::initialize(&config, deps)
            .await
            .expect("Storage policy table is invalid"),
    );

    let shutdown = CancellationToken::new();
    let sweeper = RetentionSweeper::new(Arc::clone(&store)).with_interval(config.retention_sweep);
    let sweeper_task = tokio::spawn(sweeper.run(shutdown.clone()));

    let app = router(AppState::new(Arc::clone(&store)));
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listener");
    info!(%addr, "Health vault listening");

    let signal = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            signal.cancel();
        })
        .await;
    if let Err(e) = served {
        error!(error = %e, "HTTP server failed");
    }

    shutdown.cancel();
    let _ = sweeper_task.await;
    store.shutdown().await;
}
