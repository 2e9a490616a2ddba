// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error taxonomy for the health-data store and its HTTP mapping.
//!
//! Failures local to one record (integrity, a single migration key) are
//! recovered by the layer that sees them. Failures that affect the whole
//! store degrade it instead of surfacing here, so most callers only ever see
//! `InvalidInput`, `UnroutableKey` or `Integrity`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::crypto::CryptoError;
use crate::storage::{DbError, LegacyError};
use crate::vault::VaultError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Platform vault could not produce the master key.
    #[error("master key unavailable: {0}")]
    KeyUnavailable(String),

    /// Stored record failed authentication.
    #[error("record failed integrity verification: {0}")]
    Integrity(String),

    /// Embedded engine could not be opened.
    #[error("embedded engine failed to initialize: {0}")]
    EngineInit(String),

    /// No storage policy routes this logical key.
    #[error("no storage policy routes key {key:?}")]
    UnroutableKey { key: String },

    /// One or more legacy entries stayed behind after migration.
    #[error("migration skipped {} legacy key(s)", .skipped.len())]
    MigrationPartialFailure { skipped: Vec<String> },

    /// The policy table breaks a routing invariant.
    #[error("storage policy violation: {0}")]
    PolicyViolation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Store is shut down or has no usable secure backend.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<VaultError> for StoreError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::InvalidEntryName(name) => {
                StoreError::InvalidInput(format!("invalid vault entry name: {name}"))
            }
            other => StoreError::Storage(other.to_string()),
        }
    }
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Corrupt(msg) => StoreError::Integrity(msg),
            other => StoreError::Storage(other.to_string()),
        }
    }
}

impl From<LegacyError> for StoreError {
    fn from(e: LegacyError) -> Self {
        StoreError::Storage(e.to_string())
    }
}

impl From<CryptoError> for StoreError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Integrity(msg) => StoreError::Integrity(msg),
            other => StoreError::Storage(other.to_string()),
        }
    }
}

/// Run blocking work (redb commits, vault file I/O, key stretching) off the
/// async worker threads.
pub(crate) async fn run_blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Storage(format!("blocking task failed: {e}")))?
}

// =============================================================================
// HTTP mapping
// =============================================================================

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match &e {
            StoreError::InvalidInput(_) => ApiError::bad_request(e.to_string()),
            StoreError::UnroutableKey { .. } => ApiError::unprocessable(e.to_string()),
            StoreError::KeyUnavailable(_)
            | StoreError::EngineInit(_)
            | StoreError::Unavailable(_) => ApiError::unavailable(e.to_string()),
            // Never echo storage internals back to the caller.
            StoreError::Integrity(_) => ApiError::internal("stored data failed verification"),
            StoreError::MigrationPartialFailure { .. }
            | StoreError::PolicyViolation(_)
            | StoreError::Storage(_)
            | StoreError::Serialization(_) => ApiError::internal("storage failure"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}
