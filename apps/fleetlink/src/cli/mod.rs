//! # fleetlink CLI Module
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `init` - Create the database file and its tables
//! - `inspect` - Dump the items of one partition as JSON
//! - `status` - Count the aggregates of each kind

mod commands;

use crate::config::{Config, ConfigError};
use clap::{Parser, Subcommand, ValueEnum};
use fleetlink_core::{FleetError, StoreError};
use std::path::PathBuf;
use thiserror::Error;

pub use commands::*;

// =============================================================================
// ERRORS
// =============================================================================

/// Failure of a CLI command.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] FleetError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("{0}")]
    Usage(String),
}

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// fleetlink - IoT asset-management server
///
/// Devices, SIM cards, installations, customers, surveys and regions in one
/// keyed table, with linked records kept consistent on both sides.
#[derive(Parser, Debug)]
#[command(name = "fleetlink")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the redb database file
    #[arg(short = 'D', long, global = true, default_value = "fleetlink.redb")]
    pub database: PathBuf,

    /// Storage backend
    #[arg(short = 'B', long, global = true, value_enum, default_value_t = Backend::Redb)]
    pub backend: Backend,

    /// TOML configuration file (default: $FLEETLINK_CONFIG)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// `--config`, else `FLEETLINK_CONFIG`.
    #[must_use]
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(|| {
            std::env::var_os("FLEETLINK_CONFIG")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        })
    }
}

/// Item Store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// ACID database file
    Redb,
    /// Process memory; contents are lost on exit
    Memory,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Create the database and its tables
    Init {
        /// Replace an existing database file
        #[arg(short, long)]
        force: bool,
    },

    /// Dump the items of one partition
    Inspect {
        /// Partition key, e.g. DEVICE#DEV001
        #[arg(long)]
        pk: String,

        /// Sort key prefix, e.g. CONFIG#
        #[arg(long)]
        prefix: Option<String>,

        /// Maximum number of items
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },

    /// Count aggregates of each kind
    Status,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli, config: Config) -> Result<(), CliError> {
    let json_mode = cli.json_mode;

    // `init` may replace the file, so it opens the database itself.
    if let Some(Commands::Init { force }) = cli.command {
        return cmd_init(&cli.database, cli.backend, &config, force);
    }

    let stores = Stores::open(&cli.database, cli.backend, &config)?;
    match cli.command {
        Some(Commands::Server { host, port }) => cmd_server(stores, &config, &host, port).await,
        Some(Commands::Inspect { pk, prefix, limit }) => {
            cmd_inspect(&stores, &pk, prefix.as_deref(), limit, json_mode)
        }
        Some(Commands::Status | Commands::Init { .. }) | None => cmd_status(&stores, json_mode),
    }
}
