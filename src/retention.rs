// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Retention Sweeper
//!
//! Background task that deletes data older than its category's
//! `retention_days`.
//!
//! ## Strategy
//!
//! Every `interval` (default 1 h) the sweeper:
//! 1. Purges SECURE records whose record type belongs to a category with a
//!    retention period and whose `updated_at` is past the cutoff.
//! 2. Purges LOCAL / CLOUD entries whose key resolves to such a category and
//!    whose write time is past the cutoff.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{run_blocking, StoreResult};
use crate::policy::{Category, Tier};
use crate::router::TierRouter;
use crate::store::HealthDataStore;

const MS_PER_DAY: i64 = 86_400_000;

/// Rows removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub secure_purged: u64,
    pub local_purged: u64,
}

/// Run one retention pass against the router's tiers.
pub async fn sweep(router: &TierRouter, now_ms: i64) -> StoreResult<RetentionReport> {
    let mut report = RetentionReport::default();
    let mut local_cutoffs: HashMap<Category, i64> = HashMap::new();

    for (category, policy) in router.policies().iter() {
        let Some(days) = policy.retention_days else {
            continue;
        };
        let cutoff = now_ms - i64::from(days) * MS_PER_DAY;
        match policy.tier {
            Tier::Secure => {
                if let Some(data_type) = category.data_type() {
                    report.secure_purged += router.secure().purge_expired(data_type, cutoff).await?;
                }
            }
            Tier::Local | Tier::Cloud => {
                local_cutoffs.insert(category, cutoff);
            }
        }
    }

    if !local_cutoffs.is_empty() {
        let local = Arc::clone(router.local());
        let policies = router.policies().clone();
        report.local_purged = run_blocking(move || {
            Ok(local.purge_where(|key, written_at| {
                policies
                    .category_of(key)
                    .and_then(|c| local_cutoffs.get(&c))
                    .is_some_and(|cutoff| written_at < *cutoff)
            })?)
        })
        .await?;
    }

    Ok(report)
}

/// Default interval between sweeps.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Periodic retention enforcement for a store.
pub struct RetentionSweeper {
    store: Arc<HealthDataStore>,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<HealthDataStore>) -> Self {
        Self {
            store,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the sweep loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Retention sweeper starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Retention sweeper shutting down");
                return;
            }

            self.sweep_step().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Retention sweeper shutting down");
                    return;
                }
            }
        }
    }

    async fn sweep_step(&self) {
        match self.store.enforce_retention().await {
            Ok(report) if report == RetentionReport::default() => {
                debug!("Retention sweep: nothing expired");
            }
            Ok(report) => {
                info!(
                    secure_purged = report.secure_purged,
                    local_purged = report.local_purged,
                    "Retention sweep removed expired data"
                );
            }
            Err(e) => warn!(error = %e, "Retention sweep failed"),
        }
    }
}
