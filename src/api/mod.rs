// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Loopback HTTP adapter over the store's consumer API.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod health;
pub mod health_data;
pub mod kv;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route(
            "/users/{user_id}/data",
            axum::routing::delete(health_data::delete_user_data),
        )
        .route(
            "/users/{user_id}/data/{data_type}",
            post(health_data::store_health_data)
                .get(health_data::list_health_data)
                .delete(health_data::delete_type_data),
        )
        .route(
            "/users/{user_id}/data/{data_type}/{id}",
            get(health_data::get_health_record).delete(health_data::delete_health_record),
        )
        .route(
            "/users/{user_id}/consent/{flag}",
            get(health_data::get_consent).put(health_data::set_consent),
        )
        .route("/stats", get(health_data::stats))
        .route(
            "/kv/{key}",
            get(kv::read_key).put(kv::write_key).delete(kv::remove_key),
        )
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health::liveness))
        .route("/ready", get(health::readiness))
        .with_state(state)
        .nest("/v1", v1_routes)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::StoreConfig;
    use crate::router::NoopSyncClient;
    use crate::storage::MemoryLegacyStore;
    use crate::store::{HealthDataStore, StoreDependencies};
    use crate::vault::MemoryVault;

    async fn app(dir: &std::path::Path) -> Router {
        let mut config = StoreConfig::for_dir(dir);
        config.kdf_iterations = 10;
        config.record_cache_bytes = 1 << 20;
        let store = HealthDataStore::initialize(
            &config,
            StoreDependencies {
                vault: Arc::new(MemoryVault::new()),
                legacy: Arc::new(MemoryLegacyStore::new()),
                sync: Arc::new(NoopSyncClient),
            },
        )
        .await
        .unwrap();
        router(AppState::new(Arc::new(store)))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => request
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn liveness_and_readiness() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send(&app, Method::GET, "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["mode"], "encrypted");
    }

    #[tokio::test]
    async fn record_lifecycle_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/v1/users/u1/data/health_profile",
            Some(json!({"data": {"ageRange": "25-34"}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["id"].as_str().unwrap().to_string();

        let uri = format!("/v1/users/u1/data/health_profile/{id}");
        let (status, body) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!({"ageRange": "25-34"}));

        let (status, body) = send(&app, Method::GET, "/v1/users/u1/data/health_profile", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, body) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], 1);

        let (status, _) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;
        let (status, body) = send(&app, Method::GET, "/v1/users/u1/data/vitals", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("vitals"));
    }

    #[tokio::test]
    async fn consent_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        let (_, body) = send(&app, Method::GET, "/v1/users/u1/consent/analytics", None).await;
        assert_eq!(body["granted"], false);

        let (status, _) = send(
            &app,
            Method::PUT,
            "/v1/users/u1/consent/analytics",
            Some(json!({"granted": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, Method::GET, "/v1/users/u1/consent/analytics", None).await;
        assert_eq!(body["granted"], true);

        let (_, body) = send(&app, Method::GET, "/v1/stats", None).await;
        assert_eq!(body["total_records"], 1);
        assert_eq!(body["mode"], "encrypted");
    }

    #[tokio::test]
    async fn routed_keys_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;

        let put = Request::builder()
            .method(Method::PUT)
            .uri("/v1/kv/theme")
            .body(Body::from("dark"))
            .unwrap();
        let response = app.clone().oneshot(put).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let get = Request::builder().uri("/v1/kv/theme").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"dark");

        let (status, _) = send(&app, Method::PUT, "/v1/kv/medical_notes", Some(json!("x"))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(&app, Method::DELETE, "/v1/kv/theme", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, Method::GET, "/v1/kv/theme", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
