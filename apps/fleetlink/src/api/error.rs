//! # HTTP Error Translation
//!
//! Core errors become status codes here and nowhere else:
//!
//! | Core error                        | Status |
//! |-----------------------------------|--------|
//! | `Validation`, `Precondition`      | 400    |
//! | `NotFound`                        | 404    |
//! | `Conflict`                        | 409    |
//! | `Transient`, `Store`, `Serialization` | 500 |
//!
//! Bodies are `{"error": "..."}`. Validation errors add `details` with
//! one message per rule; region conflicts add `existingInstallId`.
//! Internal failures are logged and answered with a generic message.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fleetlink_core::FleetError;
use serde_json::{Map, Value, json};

/// Error returned by every handler.
#[derive(Debug)]
pub enum ApiError {
    /// An error produced by the core.
    Core(FleetError),
    /// A malformed request rejected before reaching the core.
    BadRequest(String),
    /// A failure of the HTTP layer itself.
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::Core(FleetError::NotFound(message.into()))
    }

    /// HTTP status of this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Core(FleetError::Validation(_) | FleetError::Precondition(_))
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Core(FleetError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Core(FleetError::Conflict { .. }) => StatusCode::CONFLICT,
            Self::Core(
                FleetError::Transient(_) | FleetError::Store(_) | FleetError::Serialization(_),
            )
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> Value {
        let mut body = Map::new();
        match self {
            Self::Core(FleetError::Validation(messages)) => {
                body.insert("error".into(), json!(messages.join("; ")));
                body.insert("details".into(), json!(messages));
            }
            Self::Core(FleetError::Conflict {
                message,
                existing_id,
            }) => {
                body.insert("error".into(), json!(message));
                if let Some(id) = existing_id {
                    body.insert("existingInstallId".into(), json!(id));
                }
            }
            Self::Core(err @ (FleetError::NotFound(_) | FleetError::Precondition(_))) => {
                body.insert("error".into(), json!(err.to_string()));
            }
            Self::BadRequest(message) => {
                body.insert("error".into(), json!(message));
            }
            Self::Core(_) | Self::Internal(_) => {
                body.insert("error".into(), json!("Internal server error"));
            }
        }
        Value::Object(body)
    }
}

impl From<FleetError> for ApiError {
    fn from(err: FleetError) -> Self {
        Self::Core(err)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Core(err) => write!(f, "{}", err),
            Self::BadRequest(message) => write!(f, "{}", message),
            Self::Internal(message) => write!(f, "Internal error: {}", message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}

// =============================================================================
// TESTS
// =============================================================================
