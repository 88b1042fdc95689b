//! Survey endpoints. Every mutation is refused once a survey is submitted.

use super::{ApiResult, Created, blocking, created, view};
use crate::api::AppState;
use crate::api::types::{DeletedResponse, JsonBody, ListParams, RequestActor};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use fleetlink_core::ListPage;
use serde_json::Value;

/// GET /surveys?status=
pub async fn list_surveys(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListPage<Value>>> {
    let opts = params.status_options()?;
    let svc = state.services;
    blocking(move || svc.surveys.list(&opts)).await.map(Json)
}

/// POST /surveys
pub async fn create_survey(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    JsonBody(body): JsonBody,
) -> ApiResult<Created> {
    let svc = state.services;
    let item = blocking(move || svc.surveys.create(&body, &actor)).await?;
    Ok(created(&item))
}

/// GET /surveys/{id}
pub async fn get_survey(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let svc = state.services;
    blocking(move || svc.surveys.get(&id)).await.map(Json)
}

/// PUT /surveys/{id}
pub async fn update_survey(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<Value>> {
    let svc = state.services;
    let item = blocking(move || svc.surveys.update(&id, &body)).await?;
    Ok(view(&item))
}

/// DELETE /surveys/{id}
pub async fn delete_survey(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeletedResponse>> {
    let svc = state.services;
    let message = format!("Survey {} deleted", id);
    let children = blocking(move || svc.surveys.delete(&id)).await?;
    Ok(Json(DeletedResponse::cascade(message, children)))
}

/// POST /surveys/{id}/submit
pub async fn submit_survey(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
) -> ApiResult<Json<Value>> {
    let svc = state.services;
    let item = blocking(move || svc.surveys.submit(&id, &actor)).await?;
    Ok(view(&item))
}

/// POST /surveys/{id}/images
pub async fn add_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
    JsonBody(body): JsonBody,
) -> ApiResult<Created> {
    let svc = state.services;
    let item = blocking(move || svc.surveys.add_image(&id, &body, &actor)).await?;
    Ok(created(&item))
}

/// DELETE /surveys/{id}/images/{iid}
pub async fn delete_image(
    State(state): State<AppState>,
    Path((id, image_id)): Path<(String, String)>,
) -> ApiResult<Json<DeletedResponse>> {
    let svc = state.services;
    let message = format!("Image {} deleted from survey {}", image_id, id);
    blocking(move || svc.surveys.delete_image(&id, &image_id)).await?;
    Ok(Json(DeletedResponse::new(message)))
}
