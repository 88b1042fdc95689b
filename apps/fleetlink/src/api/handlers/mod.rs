//! # Request Handlers
//!
//! One module per aggregate. Core calls are synchronous and may touch the
//! disk, so every handler runs them on the blocking pool through
//! [`blocking`].

pub mod customers;
pub mod devices;
pub mod installs;
pub mod regions;
pub mod sims;
pub mod surveys;

use super::error::ApiError;
use super::types::HealthResponse;
use axum::{Json, http::StatusCode};
use fleetlink_core::{FleetError, Item};
use serde_json::Value;

/// Result of a handler.
pub type ApiResult<T> = Result<T, ApiError>;

/// A created record with 201.
pub type Created = (StatusCode, Json<Value>);

/// Run a core operation on the blocking pool.
pub(crate) async fn blocking<T, F>(op: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, FleetError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| ApiError::Internal(format!("worker task failed: {}", e)))?
        .map_err(ApiError::from)
}

pub(crate) fn created(item: &Item) -> Created {
    (StatusCode::CREATED, Json(item.view()))
}

pub(crate) fn view(item: &Item) -> Json<Value> {
    Json(item.view())
}

/// Health check handler.
///
/// GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}
