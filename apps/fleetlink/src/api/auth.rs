//! # Authentication Module
//!
//! API key authentication for the fleetlink HTTP API.
//!
//! When an API key is configured (`FLEETLINK_API_KEY`) and `DEV_MODE` is
//! off, every request except `/health` must carry the key in one of:
//! ```text
//! x-api-key: <your-api-key>
//! Authorization: Bearer <your-api-key>
//! ```

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Header carrying the key directly.
pub const API_KEY_HEADER: &str = "x-api-key";

// =============================================================================
// API KEY AUTHENTICATION
// =============================================================================

/// Expected key shared with the middleware.
pub type ApiKey = Arc<str>;

/// Key presented by the request, `x-api-key` first.
fn presented_key(request: &Request<Body>) -> Option<&str> {
    let headers = request.headers();
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(key);
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v))
}

/// Constant-time equality that does not leak the key length.
fn keys_match(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();

    let max_len = provided.len().max(expected.len());
    let mut padded_provided = vec![0u8; max_len];
    let mut padded_expected = vec![0u8; max_len];
    padded_provided[..provided.len()].copy_from_slice(provided);
    padded_expected[..expected.len()].copy_from_slice(expected);

    let bytes_match: bool = padded_provided.ct_eq(&padded_expected).into();
    bytes_match && provided.len() == expected.len()
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "Unauthorized"})),
    )
        .into_response()
}

/// API key authentication middleware.
///
/// `/health` is always allowed (for load balancer checks).
pub async fn api_key_auth_middleware(
    State(expected): State<ApiKey>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    match presented_key(&request) {
        Some(provided) if keys_match(provided, &expected) => next.run(request).await,
        Some(_) => {
            tracing::warn!(
                event = "auth_failure",
                reason = "invalid_api_key",
                "Authentication failed: invalid API key"
            );
            unauthorized()
        }
        None => {
            tracing::warn!(
                event = "auth_failure",
                reason = "missing_api_key",
                "Missing x-api-key or Authorization header"
            );
            unauthorized()
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_requires_equal_length() {
        assert!(keys_match("secret", "secret"));
        assert!(!keys_match("secret", "secret2"));
        assert!(!keys_match("", "secret"));
    }

    #[test]
    fn header_precedence() {
        let request = Request::builder()
            .header(API_KEY_HEADER, "from-header")
            .header(header::AUTHORIZATION, "Bearer from-bearer")
            .body(Body::empty())
            .expect("request");
        assert_eq!(presented_key(&request), Some("from-header"));

        let request = Request::builder()
            .header(header::AUTHORIZATION, "Bearer from-bearer")
            .body(Body::empty())
            .expect("request");
        assert_eq!(presented_key(&request), Some("from-bearer"));
    }

    #[tokio::test]
    async fn middleware_guards_everything_but_health() {
        use axum::{Router, middleware::from_fn_with_state, routing::get};
        use tower::ServiceExt;

        let key: ApiKey = Arc::from("secret");
        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/devices", get(|| async { "[]" }))
            .layer(from_fn_with_state(key, api_key_auth_middleware));

        let call = |uri: &'static str, key: Option<&'static str>| {
            let mut builder = Request::builder().uri(uri);
            if let Some(key) = key {
                builder = builder.header(API_KEY_HEADER, key);
            }
            app.clone().oneshot(builder.body(Body::empty()).expect("request"))
        };

        let status = |r: Result<Response, std::convert::Infallible>| match r {
            Ok(response) => response.status(),
            Err(never) => match never {},
        };
        assert_eq!(status(call("/health", None).await), StatusCode::OK);
        assert_eq!(status(call("/devices", None).await), StatusCode::UNAUTHORIZED);
        assert_eq!(status(call("/devices", Some("nope")).await), StatusCode::UNAUTHORIZED);
        assert_eq!(status(call("/devices", Some("secret")).await), StatusCode::OK);
    }
}
