// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::models::StoreMode;
use crate::state::AppState;

/// Readiness response with individual component status.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Overall status: "ok", "degraded" or "unavailable".
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Whether the service process is running.
    pub service: String,
    /// SECURE tier mode (`encrypted`, `fallback`, `locked`, `closed`).
    pub mode: StoreMode,
    /// Result of the record backend probe.
    pub secure_backend: String,
    /// Whether migration has finished and routed access is open.
    pub router: String,
}

/// Simple health check response for liveness probes.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Liveness probe handler.
///
/// Always returns 200 if the process is running.
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness probe handler.
///
/// 200 while the SECURE backend answers its probe (fallback mode reports
/// "degraded"), 503 when it is locked, closed or failing.
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let mode = state.store.mode().await;
    let probe = state.store.health_check().await;
    let router_open = state.store.router().is_open();

    let backend_ok = probe.is_ok();
    let status = match (backend_ok && router_open, mode) {
        (true, StoreMode::Encrypted) => "ok",
        (true, _) => "degraded",
        (false, _) => "unavailable",
    };

    let response = ReadyResponse {
        status: status.to_string(),
        checks: HealthChecks {
            service: "ok".to_string(),
            mode,
            secure_backend: match probe {
                Ok(()) => "ok".to_string(),
                Err(e) => e.to_string(),
            },
            router: if router_open { "open" } else { "migrating" }.to_string(),
        },
    };

    let code = if backend_ok && router_open {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}
