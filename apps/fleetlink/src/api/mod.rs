//! # fleetlink HTTP API Module
//!
//! This module implements the HTTP REST API server using axum.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `/devices` - devices, configs, repairs, runtime events, SIM link
//! - `/installs` - installs, device links and history, contact links
//! - `/simcards` - SIM cards
//! - `/surveys` - surveys and their images
//! - `/customers` - customers, contacts and addresses
//! - `/regions/{type}` - the region hierarchy
//!
//! Lists accept `?limit=1..100` (default 50) and `?nextToken=`, and answer
//! `{"items", "hasMore", "nextToken"}`.
//!
//! ## Security Configuration
//!
//! - `FLEETLINK_CORS_ORIGINS`: comma-separated allowed origins, or `*`
//! - `FLEETLINK_RATE_LIMIT`: requests per second (0 disables)
//! - `FLEETLINK_API_KEY`: when set (and `DEV_MODE` is off), requires the key

mod auth;
mod error;
pub mod handlers;
mod middleware;
mod types;

pub use auth::{API_KEY_HEADER, ApiKey};
pub use error::ApiError;
pub use middleware::{GlobalRateLimiter, create_rate_limiter};
pub use types::{
    ContactLinkRequest, DeletedResponse, DeviceLinkRequest, HealthResponse, JsonBody, ListParams,
    RequestActor,
};

use crate::config::Config;
use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post, put},
};
use fleetlink_core::{MemoryStore, Services, SystemClock};
use handlers::{customers, devices, installs, regions, sims, surveys};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Maximum accepted request body.
const BODY_LIMIT: usize = 2 * 1024 * 1024;

/// CORS preflight cache lifetime.
const CORS_MAX_AGE: Duration = Duration::from_secs(300);

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state: every aggregate service over one store.
#[derive(Clone, Debug)]
pub struct AppState {
    pub services: Arc<Services>,
}

impl AppState {
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self {
            services: Arc::new(services),
        }
    }

    /// State over a fresh in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(Services::new(
            store.clone(),
            store,
            Arc::new(SystemClock::new()),
        ))
    }
}

/// Boundary settings taken from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    /// Required key; `None` disables authentication.
    pub api_key: Option<String>,
    /// Requests per second; 0 disables the limiter.
    pub rate_limit: u32,
    /// `*` or a comma-separated origin list.
    pub cors_origins: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            rate_limit: 0,
            cors_origins: "*".to_string(),
        }
    }
}

impl ApiSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.effective_api_key().map(str::to_string),
            rate_limit: config.rate_limit,
            cors_origins: config.cors_origins.clone(),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// CORS layer allowing the methods and headers browser clients send.
///
/// `*` allows every origin; otherwise `origins` is a comma-separated list.
/// A list with no valid origin falls back to `*`.
fn build_cors_layer(origins: &str) -> CorsLayer {
    let allow_origin = if origins.trim() == "*" {
        AllowOrigin::any()
    } else {
        let allowed: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|s| {
                let trimmed = s.trim();
                match trimmed.parse::<HeaderValue>() {
                    Ok(hv) if !trimmed.is_empty() => {
                        tracing::info!("CORS: Allowing origin: {}", trimmed);
                        Some(hv)
                    }
                    Ok(_) => None,
                    Err(e) => {
                        tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                        None
                    }
                }
            })
            .collect();
        if allowed.is_empty() {
            tracing::warn!("CORS: No valid origins configured, allowing all origins");
            AllowOrigin::any()
        } else {
            AllowOrigin::list(allowed)
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::DELETE,
            Method::GET,
            Method::OPTIONS,
            Method::POST,
            Method::PUT,
            Method::PATCH,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-amz-date"),
            HeaderName::from_static("x-amz-security-token"),
            HeaderName::from_static(API_KEY_HEADER),
        ])
        .max_age(CORS_MAX_AGE)
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health_handler))
        // Devices
        .route("/devices", get(devices::list_devices).post(devices::create_device))
        .route(
            "/devices/{id}",
            get(devices::get_device)
                .put(devices::update_device)
                .delete(devices::delete_device),
        )
        .route("/devices/{id}/children", get(devices::list_children))
        .route(
            "/devices/{id}/configs",
            get(devices::list_configs).post(devices::add_config),
        )
        .route(
            "/devices/{id}/configs/{version}/{created}",
            axum::routing::delete(devices::delete_config),
        )
        .route(
            "/devices/{id}/repairs",
            get(devices::list_repairs).post(devices::add_repair),
        )
        .route("/devices/{id}/repairs/{rid}", put(devices::update_repair))
        .route(
            "/devices/{id}/runtime",
            get(devices::list_runtime).post(devices::record_runtime),
        )
        .route("/devices/{id}/install", get(devices::get_install))
        .route("/devices/{id}/sim", get(devices::get_sim))
        .route("/devices/{id}/sim/link", post(devices::link_sim))
        .route("/devices/{id}/sim/unlink", post(devices::unlink_sim))
        // Installs
        .route(
            "/installs",
            get(installs::list_installs).post(installs::create_install),
        )
        .route(
            "/installs/{id}",
            get(installs::get_install)
                .put(installs::update_install)
                .delete(installs::delete_install),
        )
        .route("/installs/{id}/devices", get(installs::list_devices))
        .route("/installs/{id}/devices/link", post(installs::link_devices))
        .route("/installs/{id}/devices/unlink", post(installs::unlink_devices))
        .route("/installs/{id}/history", get(installs::history))
        .route(
            "/installs/{id}/contacts",
            get(installs::list_contacts).post(installs::link_contact),
        )
        .route(
            "/installs/{id}/contacts/{cid}",
            axum::routing::delete(installs::unlink_contact),
        )
        // SIM cards
        .route("/simcards", get(sims::list_sims).post(sims::create_sim))
        .route(
            "/simcards/{id}",
            get(sims::get_sim).put(sims::update_sim).delete(sims::delete_sim),
        )
        // Surveys
        .route(
            "/surveys",
            get(surveys::list_surveys).post(surveys::create_survey),
        )
        .route(
            "/surveys/{id}",
            get(surveys::get_survey)
                .put(surveys::update_survey)
                .delete(surveys::delete_survey),
        )
        .route("/surveys/{id}/submit", post(surveys::submit_survey))
        .route("/surveys/{id}/images", post(surveys::add_image))
        .route(
            "/surveys/{id}/images/{iid}",
            axum::routing::delete(surveys::delete_image),
        )
        // Customers
        .route(
            "/customers",
            get(customers::list_customers).post(customers::create_customer),
        )
        .route(
            "/customers/{id}",
            get(customers::get_customer)
                .put(customers::update_customer)
                .delete(customers::delete_customer),
        )
        .route(
            "/customers/{id}/contacts",
            get(customers::list_contacts).post(customers::create_contact),
        )
        .route(
            "/customers/{id}/contacts/{cid}",
            get(customers::get_contact)
                .put(customers::update_contact)
                .delete(customers::delete_contact),
        )
        .route(
            "/customers/{id}/addresses",
            get(customers::list_addresses).post(customers::create_address),
        )
        .route(
            "/customers/{id}/addresses/{aid}",
            axum::routing::delete(customers::delete_address),
        )
        // Regions
        .route(
            "/regions/{type}",
            get(regions::list_regions).post(regions::create_region),
        )
        .route(
            "/regions/{type}/{code}",
            get(regions::get_region)
                .put(regions::update_region)
                .delete(regions::delete_region),
        )
        .route("/regions/{type}/{code}/children", get(regions::list_children))
}

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. CORS - handles preflight requests
/// 3. Rate Limiting - global limiter (if enabled)
/// 4. Authentication - validates API key (if configured)
pub fn create_router(state: AppState, settings: &ApiSettings) -> Router {
    let mut router = routes();

    match settings.api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => {
            tracing::info!("API key authentication enabled");
            let key: ApiKey = Arc::from(key);
            router = router.layer(axum_middleware::from_fn_with_state(
                key,
                auth::api_key_auth_middleware,
            ));
        }
        None => tracing::warn!(
            "API key authentication DISABLED - all endpoints are publicly accessible. \
             Set FLEETLINK_API_KEY (and leave DEV_MODE off) to enable authentication."
        ),
    }

    match create_rate_limiter(settings.rate_limit) {
        Some(limiter) => {
            tracing::info!("Rate limiting enabled: {} requests/second", settings.rate_limit);
            router = router.layer(axum_middleware::from_fn_with_state(
                limiter,
                middleware::rate_limit_middleware,
            ));
        }
        None => tracing::info!("Rate limiting disabled"),
    }

    router
        .layer(axum::extract::DefaultBodyLimit::max(BODY_LIMIT))
        .layer(build_cors_layer(&settings.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Bind `addr` and serve until the process is stopped.
pub async fn run_server(addr: &str, state: AppState, settings: &ApiSettings) -> std::io::Result<()> {
    let router = create_router(state, settings);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("fleetlink HTTP server listening on {}", addr);
    axum::serve(listener, router).await
}
