//! # API Types
//!
//! Request and response types, plus the extractors every handler shares:
//! [`JsonBody`] (JSON with 400 on malformed input), [`RequestActor`] (who
//! is calling) and [`ListParams`] (pagination and filters).

use super::error::ApiError;
use axum::{
    Json,
    extract::{FromRequest, FromRequestParts, Request},
    http::request::Parts,
};
use fleetlink_core::{Actor, Filter, HistoryOrder, ListOptions};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::convert::Infallible;

/// Caller recorded when no `x-user-id` is sent.
const SYSTEM_USER: &str = "system";

// =============================================================================
// RESPONSES
// =============================================================================

/// Response for `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Response for deletes.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedResponse {
    pub message: String,
    /// Sub-entities removed by the cascade.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_children: Option<usize>,
}

impl DeletedResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            deleted_children: None,
        }
    }

    pub fn cascade(message: impl Into<String>, children: usize) -> Self {
        Self {
            message: message.into(),
            deleted_children: Some(children),
        }
    }
}

// =============================================================================
// REQUESTS
// =============================================================================

/// Body of `POST /installs/{id}/devices/link|unlink`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLinkRequest {
    pub device_ids: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Body of `POST /installs/{id}/contacts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactLinkRequest {
    pub contact_id: String,
}

// =============================================================================
// EXTRACTORS
// =============================================================================

/// JSON request body; any rejection is a 400 with a JSON error body.
#[derive(Debug)]
pub struct JsonBody<T = Value>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::bad_request(format!(
                "Invalid JSON body: {}",
                rejection.body_text()
            ))),
        }
    }
}

/// Caller identity for audit fields.
///
/// `x-user-id` names the caller (default `system`); the client IP is the
/// first `x-forwarded-for` entry.
#[derive(Debug, Clone)]
pub struct RequestActor(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for RequestActor {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        let ip = header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let user = header("x-user-id").unwrap_or(SYSTEM_USER);
        Ok(Self(Actor::new(user, ip)))
    }
}

/// Query string of list endpoints.
///
/// Filters are only honored by the endpoints that document them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub limit: Option<String>,
    pub next_token: Option<String>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub provider: Option<String>,
    pub customer_id: Option<String>,
    pub state_id: Option<String>,
    pub district_id: Option<String>,
    pub parent: Option<String>,
    pub order: Option<String>,
    pub include_links: Option<String>,
}

impl ListParams {
    /// Pagination only.
    pub fn options(&self) -> Result<ListOptions, ApiError> {
        let mut opts = ListOptions::new().after(
            self.next_token
                .as_ref()
                .filter(|t| !t.is_empty())
                .cloned(),
        );
        if let Some(limit) = self.limit.as_deref() {
            let limit = limit.trim().parse::<usize>().map_err(|_| {
                ApiError::bad_request(format!("limit must be a number, got {:?}", limit))
            })?;
            opts = opts.limit(limit);
        }
        Ok(opts)
    }

    /// `status`, `type`, `from` and `to` over device METAs.
    pub fn device_options(&self) -> Result<ListOptions, ApiError> {
        let mut opts = self.equals(
            self.options()?,
            &[(&self.status, "Status"), (&self.device_type, "DeviceType")],
        );
        if let Some(from) = &self.from {
            opts = opts.filter(Filter::From {
                attr: "CreatedDate".into(),
                value: from.clone(),
            });
        }
        if let Some(to) = &self.to {
            opts = opts.filter(Filter::To {
                attr: "CreatedDate".into(),
                value: to.clone(),
            });
        }
        Ok(opts)
    }

    /// `provider` over SIM METAs; `status` is applied by the SIM listing.
    pub fn sim_options(&self) -> Result<ListOptions, ApiError> {
        Ok(self.equals(self.options()?, &[(&self.provider, "provider")]))
    }

    /// `status`, `customerId`, `stateId` and `districtId` over installs.
    pub fn install_options(&self) -> Result<ListOptions, ApiError> {
        Ok(self.equals(
            self.options()?,
            &[
                (&self.status, "Status"),
                (&self.customer_id, "CustomerId"),
                (&self.state_id, "StateId"),
                (&self.district_id, "DistrictId"),
            ],
        ))
    }

    /// `status` over survey or customer METAs.
    pub fn status_options(&self) -> Result<ListOptions, ApiError> {
        Ok(self.equals(self.options()?, &[(&self.status, "Status")]))
    }

    /// `order=asc|desc`, newest first by default.
    pub fn history_order(&self) -> Result<HistoryOrder, ApiError> {
        match self.order.as_deref() {
            None => Ok(HistoryOrder::default()),
            Some(order) => HistoryOrder::parse(order).ok_or_else(|| {
                ApiError::bad_request(format!("order must be asc or desc, got {:?}", order))
            }),
        }
    }

    /// `includeLinks`, on unless explicitly disabled.
    #[must_use]
    pub fn include_links(&self) -> bool {
        !matches!(
            self.include_links.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("false" | "0" | "no")
        )
    }

    fn equals(&self, mut opts: ListOptions, pairs: &[(&Option<String>, &str)]) -> ListOptions {
        for (value, attr) in pairs {
            if let Some(value) = value.as_ref().filter(|v| !v.is_empty()) {
                opts = opts.filter(Filter::equals(attr, value.clone()));
            }
        }
        opts
    }
}

// =============================================================================
// TESTS
// =============================================================================
