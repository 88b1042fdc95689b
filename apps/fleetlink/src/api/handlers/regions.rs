//! Region hierarchy endpoints. `{type}` is one of STATE, DISTRICT,
//! MANDAL, VILLAGE or HABITATION (case-insensitive).

use super::{ApiResult, Created, blocking, created, view};
use crate::api::AppState;
use crate::api::types::{DeletedResponse, JsonBody, ListParams};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use fleetlink_core::ListPage;
use serde_json::Value;

/// GET /regions/{type}?parent=
pub async fn list_regions(
    State(state): State<AppState>,
    Path(region_type): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListPage<Value>>> {
    let opts = params.options()?;
    let parent = params.parent.filter(|p| !p.is_empty());
    let svc = state.services;
    blocking(move || svc.regions.list(&region_type, parent.as_deref(), &opts))
        .await
        .map(Json)
}

/// POST /regions/{type}
pub async fn create_region(
    State(state): State<AppState>,
    Path(region_type): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult<Created> {
    let svc = state.services;
    let item = blocking(move || svc.regions.create(&region_type, &body)).await?;
    Ok(created(&item))
}

/// GET /regions/{type}/{code}
pub async fn get_region(
    State(state): State<AppState>,
    Path((region_type, code)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let svc = state.services;
    blocking(move || svc.regions.get(&region_type, &code))
        .await
        .map(Json)
}

/// PUT /regions/{type}/{code}
pub async fn update_region(
    State(state): State<AppState>,
    Path((region_type, code)): Path<(String, String)>,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<Value>> {
    let svc = state.services;
    let item = blocking(move || svc.regions.update(&region_type, &code, &body)).await?;
    Ok(view(&item))
}

/// DELETE /regions/{type}/{code}
pub async fn delete_region(
    State(state): State<AppState>,
    Path((region_type, code)): Path<(String, String)>,
) -> ApiResult<Json<DeletedResponse>> {
    let svc = state.services;
    let message = format!("Region {} {} deleted", region_type.to_ascii_uppercase(), code);
    blocking(move || svc.regions.delete(&region_type, &code)).await?;
    Ok(Json(DeletedResponse::new(message)))
}

/// GET /regions/{type}/{code}/children
pub async fn list_children(
    State(state): State<AppState>,
    Path((region_type, code)): Path<(String, String)>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListPage<Value>>> {
    let opts = params.options()?;
    let svc = state.services;
    blocking(move || svc.regions.children(&region_type, &code, &opts))
        .await
        .map(Json)
}
