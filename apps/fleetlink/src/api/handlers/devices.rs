//! Device endpoints, including configs, repairs, runtime events and the
//! device side of the SIM and install links.

use super::{ApiResult, Created, blocking, created, view};
use crate::api::AppState;
use crate::api::error::ApiError;
use crate::api::types::{DeletedResponse, JsonBody, ListParams, RequestActor};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use fleetlink_core::validate::{Mode, schemas};
use fleetlink_core::{DeviceChild, FleetError, LinkView, ListPage, SimLink};
use serde_json::Value;

// =============================================================================
// DEVICE
// =============================================================================

/// GET /devices
pub async fn list_devices(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListPage<Value>>> {
    let opts = params.device_options()?;
    let svc = state.services;
    blocking(move || svc.devices.list(&opts)).await.map(Json)
}

/// POST /devices
pub async fn create_device(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> ApiResult<Created> {
    let svc = state.services;
    let item = blocking(move || svc.devices.create(&body)).await?;
    Ok(created(&item))
}

/// GET /devices/{id}
pub async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let include_links = params.include_links();
    let svc = state.services;
    blocking(move || svc.devices.get(&id, include_links))
        .await
        .map(Json)
}

/// PUT /devices/{id}
pub async fn update_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<Value>> {
    let svc = state.services;
    let item = blocking(move || svc.devices.update(&id, &body)).await?;
    Ok(view(&item))
}

/// DELETE /devices/{id}
pub async fn delete_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeletedResponse>> {
    let svc = state.services;
    let message = format!("Device {} deleted", id);
    let children = blocking(move || svc.devices.delete(&id)).await?;
    Ok(Json(DeletedResponse::cascade(message, children)))
}

/// GET /devices/{id}/children
pub async fn list_children(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListPage<DeviceChild>>> {
    let opts = params.options()?;
    let svc = state.services;
    blocking(move || svc.devices.children(&id, &opts))
        .await
        .map(Json)
}

// =============================================================================
// CONFIGS
// =============================================================================

/// GET /devices/{id}/configs
pub async fn list_configs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListPage<Value>>> {
    let opts = params.options()?;
    let svc = state.services;
    blocking(move || svc.devices.list_configs(&id, &opts))
        .await
        .map(Json)
}

/// POST /devices/{id}/configs
pub async fn add_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult<Created> {
    let svc = state.services;
    let item = blocking(move || svc.devices.add_config(&id, &body)).await?;
    Ok(created(&item))
}

/// DELETE /devices/{id}/configs/{version}/{created}
pub async fn delete_config(
    State(state): State<AppState>,
    Path((id, version, created_date)): Path<(String, String, String)>,
) -> ApiResult<Json<DeletedResponse>> {
    let svc = state.services;
    let message = format!("Config {} deleted for device {}", version, id);
    blocking(move || svc.devices.delete_config(&id, &version, &created_date)).await?;
    Ok(Json(DeletedResponse::new(message)))
}

// =============================================================================
// REPAIRS
// =============================================================================

/// GET /devices/{id}/repairs
pub async fn list_repairs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListPage<Value>>> {
    let opts = params.status_options()?;
    let svc = state.services;
    blocking(move || svc.devices.list_repairs(&id, &opts))
        .await
        .map(Json)
}

/// POST /devices/{id}/repairs
pub async fn add_repair(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult<Created> {
    let svc = state.services;
    let item = blocking(move || svc.devices.add_repair(&id, &body)).await?;
    Ok(created(&item))
}

/// PUT /devices/{id}/repairs/{rid}
pub async fn update_repair(
    State(state): State<AppState>,
    Path((id, repair_id)): Path<(String, String)>,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<Value>> {
    let svc = state.services;
    let item = blocking(move || svc.devices.update_repair(&id, &repair_id, &body)).await?;
    Ok(view(&item))
}

// =============================================================================
// RUNTIME
// =============================================================================

/// GET /devices/{id}/runtime
pub async fn list_runtime(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListPage<Value>>> {
    let opts = params.options()?;
    let svc = state.services;
    blocking(move || svc.devices.list_runtime(&id, &opts))
        .await
        .map(Json)
}

/// POST /devices/{id}/runtime
pub async fn record_runtime(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult<Created> {
    let svc = state.services;
    let item = blocking(move || svc.devices.record_runtime(&id, &body)).await?;
    Ok(created(&item))
}

// =============================================================================
// LINKS
// =============================================================================

/// GET /devices/{id}/install
pub async fn get_install(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<LinkView>> {
    let svc = state.services;
    let device_id = id.clone();
    blocking(move || svc.links.get_install_for_device(&device_id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("No install linked to device {}", id)))
}

/// GET /devices/{id}/sim
pub async fn get_sim(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<LinkView>> {
    let svc = state.services;
    let device_id = id.clone();
    blocking(move || svc.links.get_sim_for_device(&device_id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("No SIM linked to device {}", id)))
}

/// POST /devices/{id}/sim/link
///
/// Body: `{"simId": "..."}`.
pub async fn link_sim(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<SimLink>> {
    let svc = state.services;
    blocking(move || {
        let fields = schemas::LINK_SIM
            .validate(&body, Mode::Create)
            .map_err(FleetError::Validation)?;
        let sim_id = fields
            .get("simId")
            .and_then(Value::as_str)
            .ok_or_else(|| FleetError::validation("simId is required"))?;
        svc.links.link_sim(&id, sim_id, &actor)
    })
    .await
    .map(Json)
}

/// POST /devices/{id}/sim/unlink
pub async fn unlink_sim(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
) -> ApiResult<Json<SimLink>> {
    let svc = state.services;
    blocking(move || svc.links.unlink_sim(&id, &actor))
        .await
        .map(Json)
}
