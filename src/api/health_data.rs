// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Consumer API handlers: per-user encrypted records and consent flags.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::ApiError,
    models::{DataType, HealthEntry, StoreStats},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct StoreHealthDataRequest {
    /// Record id to create or replace. Generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub data: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoredResponse {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub removed: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConsentResponse {
    pub flag: String,
    pub granted: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetConsentRequest {
    pub granted: bool,
}

fn parse_type(raw: &str) -> Result<DataType, ApiError> {
    Ok(raw.parse::<DataType>()?)
}

pub async fn store_health_data(
    State(state): State<AppState>,
    Path((user_id, data_type)): Path<(String, String)>,
    Json(request): Json<StoreHealthDataRequest>,
) -> Result<(StatusCode, Json<StoredResponse>), ApiError> {
    let data_type = parse_type(&data_type)?;
    let id = state
        .store
        .store_health_data(&user_id, data_type, &request.data, request.id.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(StoredResponse { id })))
}

pub async fn list_health_data(
    State(state): State<AppState>,
    Path((user_id, data_type)): Path<(String, String)>,
) -> Result<Json<Vec<HealthEntry>>, ApiError> {
    let data_type = parse_type(&data_type)?;
    let entries = state
        .store
        .get_health_data(&user_id, data_type, None)
        .await?;
    Ok(Json(entries))
}

pub async fn get_health_record(
    State(state): State<AppState>,
    Path((user_id, data_type, id)): Path<(String, String, String)>,
) -> Result<Json<HealthEntry>, ApiError> {
    let data_type = parse_type(&data_type)?;
    let entry = state
        .store
        .get_health_data(&user_id, data_type, Some(&id))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::not_found(format!("record {id} not found")))?;
    Ok(Json(entry))
}

pub async fn delete_user_data(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let removed = state.store.delete_health_data(&user_id, None, None).await?;
    Ok(Json(DeletedResponse { removed }))
}

pub async fn delete_type_data(
    State(state): State<AppState>,
    Path((user_id, data_type)): Path<(String, String)>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let data_type = parse_type(&data_type)?;
    let removed = state
        .store
        .delete_health_data(&user_id, Some(data_type), None)
        .await?;
    Ok(Json(DeletedResponse { removed }))
}

pub async fn delete_health_record(
    State(state): State<AppState>,
    Path((user_id, data_type, id)): Path<(String, String, String)>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let data_type = parse_type(&data_type)?;
    let removed = state
        .store
        .delete_health_data(&user_id, Some(data_type), Some(&id))
        .await?;
    Ok(Json(DeletedResponse { removed }))
}

pub async fn get_consent(
    State(state): State<AppState>,
    Path((user_id, flag)): Path<(String, String)>,
) -> Result<Json<ConsentResponse>, ApiError> {
    let granted = state.store.has_consent(&user_id, &flag).await?;
    Ok(Json(ConsentResponse { flag, granted }))
}

pub async fn set_consent(
    State(state): State<AppState>,
    Path((user_id, flag)): Path<(String, String)>,
    Json(request): Json<SetConsentRequest>,
) -> Result<Json<ConsentResponse>, ApiError> {
    state
        .store
        .set_consent(&user_id, &flag, request.granted)
        .await?;
    Ok(Json(ConsentResponse {
        flag,
        granted: request.granted,
    }))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<StoreStats>, ApiError> {
    Ok(Json(state.store.stats().await?))
}
