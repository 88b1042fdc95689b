//! # fleetlink
//!
//! The HTTP and CLI surface of fleetlink - THE BINARY.
//!
//! - `api`: axum router, middleware and handlers over `fleetlink_core::Services`
//! - `cli`: clap commands (`server`, `init`, `inspect`, `status`)
//! - `config`: TOML file plus environment overrides
//!
//! Core errors are translated to HTTP status codes in `api` and nowhere
//! else.

pub mod api;
pub mod cli;
pub mod config;

pub use api::{ApiError, ApiSettings, AppState, create_router, run_server};
pub use config::{Config, ConfigError};
