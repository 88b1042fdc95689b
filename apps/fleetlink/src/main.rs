//! # fleetlink - IoT Asset Management Server
//!
//! The main binary for fleetlink.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               apps/fleetlink (THE BINARY)            │
//! │                                                      │
//! │   ┌─────────────┐          ┌─────────────┐           │
//! │   │    CLI      │          │  HTTP API   │           │
//! │   │   (clap)    │          │   (axum)    │           │
//! │   └──────┬──────┘          └──────┬──────┘           │
//! │          └───────────┬────────────┘                  │
//! │                      ▼                               │
//! │             ┌─────────────────┐                      │
//! │             │ fleetlink-core  │                      │
//! │             │  (THE STORE)    │                      │
//! │             └─────────────────┘                      │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Create the database, then serve it
//! fleetlink init
//! fleetlink server --host 0.0.0.0 --port 8080
//!
//! # Look at one partition
//! fleetlink inspect --pk DEVICE#DEV001 --prefix CONFIG#
//! ```

use clap::Parser;
use fleetlink::Config;
use fleetlink::cli::{self, Cli};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(cli.config_path().as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    init_tracing(&config, cli.verbose);

    if !cli.quiet {
        print_banner();
    }

    if let Err(e) = cli::execute(cli, config).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins, then `LOG_LEVEL`, then `--verbose`.
/// `FLEETLINK_LOG_FORMAT=json` enables machine-parseable output.
fn init_tracing(config: &Config, verbose: bool) {
    let fallback = config.log_directive().unwrap_or_else(|| {
        if verbose {
            "fleetlink=debug,fleetlink_core=debug,tower_http=debug".to_string()
        } else {
            "fleetlink=info,fleetlink_core=info,tower_http=info".to_string()
        }
    });
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let log_format = std::env::var("FLEETLINK_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}

fn print_banner() {
    println!(
        r#"
  ┌─┐┬  ┌─┐┌─┐┌┬┐┬  ┬┌┐┌┬┌─
  ├┤ │  ├┤ ├┤  │ │  ││││├┴┐
  └  ┴─┘└─┘└─┘ ┴ ┴─┘┴┘└┘┴ ┴

  IoT asset management v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
