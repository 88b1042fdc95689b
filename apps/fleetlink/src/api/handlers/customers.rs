//! Customer endpoints with nested contacts and addresses. Keys come from
//! the path only.

use super::{ApiResult, Created, blocking, created, view};
use crate::api::AppState;
use crate::api::types::{DeletedResponse, JsonBody, ListParams};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use fleetlink_core::ListPage;
use serde_json::Value;

/// GET /customers?status=
pub async fn list_customers(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListPage<Value>>> {
    let opts = params.status_options()?;
    let svc = state.services;
    blocking(move || svc.customers.list(&opts)).await.map(Json)
}

/// POST /customers
pub async fn create_customer(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> ApiResult<Created> {
    let svc = state.services;
    let item = blocking(move || svc.customers.create(&body)).await?;
    Ok(created(&item))
}

/// GET /customers/{id}
pub async fn get_customer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let svc = state.services;
    blocking(move || svc.customers.get(&id)).await.map(Json)
}

/// PUT /customers/{id}
pub async fn update_customer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<Value>> {
    let svc = state.services;
    let item = blocking(move || svc.customers.update(&id, &body)).await?;
    Ok(view(&item))
}

/// DELETE /customers/{id}
pub async fn delete_customer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeletedResponse>> {
    let svc = state.services;
    let message = format!("Customer {} deleted", id);
    let children = blocking(move || svc.customers.delete(&id)).await?;
    Ok(Json(DeletedResponse::cascade(message, children)))
}

// =============================================================================
// CONTACTS
// =============================================================================

/// GET /customers/{id}/contacts
pub async fn list_contacts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListPage<Value>>> {
    let opts = params.options()?;
    let svc = state.services;
    blocking(move || svc.customers.list_contacts(&id, &opts))
        .await
        .map(Json)
}

/// POST /customers/{id}/contacts
pub async fn create_contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult<Created> {
    let svc = state.services;
    let item = blocking(move || svc.customers.create_contact(&id, &body)).await?;
    Ok(created(&item))
}

/// GET /customers/{id}/contacts/{cid}
pub async fn get_contact(
    State(state): State<AppState>,
    Path((id, contact_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let svc = state.services;
    blocking(move || svc.customers.get_contact(&id, &contact_id))
        .await
        .map(Json)
}

/// PUT /customers/{id}/contacts/{cid}
pub async fn update_contact(
    State(state): State<AppState>,
    Path((id, contact_id)): Path<(String, String)>,
    JsonBody(body): JsonBody,
) -> ApiResult<Json<Value>> {
    let svc = state.services;
    let item = blocking(move || svc.customers.update_contact(&id, &contact_id, &body)).await?;
    Ok(view(&item))
}

/// DELETE /customers/{id}/contacts/{cid}
pub async fn delete_contact(
    State(state): State<AppState>,
    Path((id, contact_id)): Path<(String, String)>,
) -> ApiResult<Json<DeletedResponse>> {
    let svc = state.services;
    let message = format!("Contact {} deleted", contact_id);
    blocking(move || svc.customers.delete_contact(&id, &contact_id)).await?;
    Ok(Json(DeletedResponse::new(message)))
}

// =============================================================================
// ADDRESSES
// =============================================================================

/// GET /customers/{id}/addresses
pub async fn list_addresses(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ListPage<Value>>> {
    let opts = params.options()?;
    let svc = state.services;
    blocking(move || svc.customers.list_addresses(&id, &opts))
        .await
        .map(Json)
}

/// POST /customers/{id}/addresses
pub async fn create_address(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult<Created> {
    let svc = state.services;
    let item = blocking(move || svc.customers.create_address(&id, &body)).await?;
    Ok(created(&item))
}

/// DELETE /customers/{id}/addresses/{aid}
pub async fn delete_address(
    State(state): State<AppState>,
    Path((id, address_id)): Path<(String, String)>,
) -> ApiResult<Json<DeletedResponse>> {
    let svc = state.services;
    let message = format!("Address {} deleted", address_id);
    blocking(move || svc.customers.delete_address(&id, &address_id)).await?;
    Ok(Json(DeletedResponse::new(message)))
}
