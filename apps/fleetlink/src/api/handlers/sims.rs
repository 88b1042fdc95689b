//! SIM card endpoints.

use super::{ApiResult, Created, blocking, created, view};
use crate::api::AppState;
use crate::api::types::{DeletedResponse, JsonBody, ListParams, RequestActor};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use fleetlink_core::ListPage;
use serde_json::Value;

/// GET /simcards?status=&provider=
pub async fn list_sims(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListPage<Value>>> {
    let opts = params.sim_options()?;
    let status = params.status.filter(|s| !s.is_empty());
    let svc = state.services;
    blocking(move || match status {
        Some(status) => svc.sims.list_by_status(&status, &opts),
        None => svc.sims.list(&opts),
    })
    .await
    .map(Json)
}

/// POST /simcards
pub async fn create_sim(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> ApiResult<Created> {
    let svc = state.services;
    let item = blocking(move || svc.sims.create(&body)).await?;
    Ok(created(&item))
}

/// GET /simcards/{id}
pub async fn get_sim(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let svc = state.services;
    blocking(move || svc.sims.get(&id)).await.map(Json)
}

/// PUT /simcards/{id}
///
/// A `status` change is a state transition recorded in `changeHistory`.
pub async fn update_sim(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<Value>> {
    let svc = state.services;
    let item = blocking(move || svc.sims.update(&id, &body, &actor)).await?;
    Ok(view(&item))
}

/// DELETE /simcards/{id}
pub async fn delete_sim(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeletedResponse>> {
    let svc = state.services;
    let message = format!("SIM {} deleted", id);
    blocking(move || svc.sims.delete(&id)).await?;
    Ok(Json(DeletedResponse::new(message)))
}
