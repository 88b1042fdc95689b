//! Install endpoints: the aggregate, its device links and history, and its
//! contact links.

use super::{ApiResult, Created, blocking, created, view};
use crate::api::AppState;
use crate::api::types::{
    ContactLinkRequest, DeletedResponse, DeviceLinkRequest, JsonBody, ListParams, RequestActor,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use fleetlink_core::{ContactLinkOutcome, ContactLinkStatus, LinkReport, ListPage};
use serde_json::Value;

/// GET /installs
pub async fn list_installs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListPage<Value>>> {
    let opts = params.install_options()?;
    let svc = state.services;
    blocking(move || svc.installs.list(&opts)).await.map(Json)
}

/// POST /installs
///
/// 409 with `existingInstallId` when the region already has an install.
pub async fn create_install(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    JsonBody(body): JsonBody,
) -> ApiResult<Created> {
    let svc = state.services;
    let item = blocking(move || svc.installs.create(&body, &actor)).await?;
    Ok(created(&item))
}

/// GET /installs/{id}
pub async fn get_install(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let include_links = params.include_links();
    let svc = state.services;
    blocking(move || svc.installs.get(&id, include_links))
        .await
        .map(Json)
}

/// PUT /installs/{id}
pub async fn update_install(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<Value>> {
    let svc = state.services;
    let item = blocking(move || svc.installs.update(&id, &body)).await?;
    Ok(view(&item))
}

/// DELETE /installs/{id}
pub async fn delete_install(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeletedResponse>> {
    let svc = state.services;
    let message = format!("Install {} deleted", id);
    let children = blocking(move || svc.installs.delete(&id)).await?;
    Ok(Json(DeletedResponse::cascade(message, children)))
}

// =============================================================================
// DEVICES
// =============================================================================

/// GET /installs/{id}/devices
pub async fn list_devices(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListPage<Value>>> {
    let opts = params.options()?;
    let svc = state.services;
    blocking(move || svc.installs.devices(&id, &opts))
        .await
        .map(Json)
}

/// POST /installs/{id}/devices/link
///
/// Always 200 once the install exists; per-device failures are listed in
/// `errors`.
pub async fn link_devices(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
    JsonBody(body): JsonBody<DeviceLinkRequest>,
) -> ApiResult<Json<LinkReport>> {
    let svc = state.services;
    blocking(move || {
        svc.installs
            .link_devices(&id, &body.device_ids, body.reason.as_deref(), &actor)
    })
    .await
    .map(Json)
}

/// POST /installs/{id}/devices/unlink
pub async fn unlink_devices(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
    JsonBody(body): JsonBody<DeviceLinkRequest>,
) -> ApiResult<Json<LinkReport>> {
    let svc = state.services;
    blocking(move || {
        svc.installs
            .unlink_devices(&id, &body.device_ids, body.reason.as_deref(), &actor)
    })
    .await
    .map(Json)
}

/// GET /installs/{id}/history?order=asc|desc
pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListPage<Value>>> {
    let order = params.history_order()?;
    let opts = params.options()?;
    let svc = state.services;
    blocking(move || svc.installs.history(&id, order, &opts))
        .await
        .map(Json)
}

// =============================================================================
// CONTACTS
// =============================================================================

/// GET /installs/{id}/contacts
pub async fn list_contacts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListPage<Value>>> {
    let opts = params.options()?;
    let svc = state.services;
    blocking(move || svc.installs.contacts(&id, &opts))
        .await
        .map(Json)
}

/// POST /installs/{id}/contacts
///
/// 201 when the link is new, 200 when it already existed.
pub async fn link_contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RequestActor(actor): RequestActor,
    JsonBody(body): JsonBody<ContactLinkRequest>,
) -> ApiResult<(StatusCode, Json<ContactLinkOutcome>)> {
    let svc = state.services;
    let outcome = blocking(move || svc.links.link_contact(&id, &body.contact_id, &actor)).await?;
    let status = match outcome.status {
        ContactLinkStatus::Linked => StatusCode::CREATED,
        ContactLinkStatus::AlreadyLinked => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

/// DELETE /installs/{id}/contacts/{contactId}
pub async fn unlink_contact(
    State(state): State<AppState>,
    Path((id, contact_id)): Path<(String, String)>,
) -> ApiResult<Json<DeletedResponse>> {
    let svc = state.services;
    let message = format!("Contact {} unlinked from install {}", contact_id, id);
    blocking(move || svc.links.unlink_contact(&id, &contact_id)).await?;
    Ok(Json(DeletedResponse::new(message)))
}
