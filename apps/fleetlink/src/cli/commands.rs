//! # CLI Command Implementations

use super::{Backend, CliError};
use crate::api::{self, ApiSettings, AppState};
use crate::config::Config;
use fleetlink_core::keys::{CUSTOMER_SK, EntityKind};
use fleetlink_core::primitives::{MAX_PAGE_SIZE, META_SK};
use fleetlink_core::{ItemStore, MemoryStore, Query, RedbStore, Services, SystemClock};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;

// =============================================================================
// STORES
// =============================================================================

/// The main table and the customer table (possibly the same one).
#[derive(Debug, Clone)]
pub struct Stores {
    pub primary: Arc<dyn ItemStore>,
    pub customers: Arc<dyn ItemStore>,
}

impl Stores {
    /// Open the configured tables on `backend`.
    pub fn open(db_path: &Path, backend: Backend, config: &Config) -> Result<Self, CliError> {
        match backend {
            Backend::Redb => {
                let primary = RedbStore::open(db_path, &config.table_name)?;
                let customers: Arc<dyn ItemStore> =
                    if config.customers_table() == config.table_name {
                        Arc::new(primary.clone())
                    } else {
                        Arc::new(primary.with_table(config.customers_table())?)
                    };
                tracing::debug!(
                    path = %db_path.display(),
                    table = %config.table_name,
                    customers = %config.customers_table(),
                    "redb stores opened"
                );
                Ok(Self {
                    primary: Arc::new(primary),
                    customers,
                })
            }
            Backend::Memory => {
                let primary: Arc<dyn ItemStore> = Arc::new(MemoryStore::new());
                let customers: Arc<dyn ItemStore> =
                    if config.customers_table() == config.table_name {
                        primary.clone()
                    } else {
                        Arc::new(MemoryStore::new())
                    };
                Ok(Self { primary, customers })
            }
        }
    }

    /// Wire every aggregate service over these tables.
    #[must_use]
    pub fn services(&self) -> Services {
        Services::new(
            self.primary.clone(),
            self.customers.clone(),
            Arc::new(SystemClock::new()),
        )
    }
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(
    stores: Stores,
    config: &Config,
    host: &str,
    port: u16,
) -> Result<(), CliError> {
    let settings = ApiSettings::from_config(config);

    println!("fleetlink Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:      {}", host);
    println!("  Port:      {}", port);
    println!("  Table:     {}", config.table_name);
    println!("  Customers: {}", config.customers_table());
    println!(
        "  Auth:      {}",
        if settings.api_key.is_some() {
            "API key"
        } else {
            "disabled"
        }
    );
    println!();

    if config.dev_mode {
        tracing::warn!("DEV_MODE is on: API key authentication is bypassed");
    }
    if let Some(alias) = &config.kms_key_alias {
        tracing::info!(alias = %alias, "KMS key alias configured; field encryption is not applied");
    }

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, AppState::new(stores.services()), &settings)
        .await
        .map_err(|e| CliError::Io(format!("Server error: {}", e)))
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create the database file and both tables.
pub fn cmd_init(
    db_path: &Path,
    backend: Backend,
    config: &Config,
    force: bool,
) -> Result<(), CliError> {
    if backend == Backend::Memory {
        return Err(CliError::Usage(
            "init has nothing to create for the memory backend".to_string(),
        ));
    }
    if db_path.exists() {
        if !force {
            return Err(CliError::Usage(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(db_path)
            .map_err(|e| CliError::Io(format!("Cannot remove {}: {}", db_path.display(), e)))?;
    }

    Stores::open(db_path, backend, config)?;
    println!(
        "Initialized redb database at {} (tables: {}, {})",
        db_path.display(),
        config.table_name,
        config.customers_table()
    );
    Ok(())
}

// =============================================================================
// INSPECT COMMAND
// =============================================================================

/// Print the items of partition `pk`, optionally under a sort-key prefix.
pub fn cmd_inspect(
    stores: &Stores,
    pk: &str,
    prefix: Option<&str>,
    limit: usize,
    json_mode: bool,
) -> Result<(), CliError> {
    let items = read_partition(stores.primary.as_ref(), pk, prefix, limit)?;
    if json_mode {
        println!("{}", Value::Array(items));
        return Ok(());
    }

    println!("Partition {} ({} item(s))", pk, items.len());
    for item in &items {
        let pretty = serde_json::to_string_pretty(item)
            .map_err(|e| CliError::Io(format!("Cannot format item: {}", e)))?;
        println!("{}", pretty);
    }
    Ok(())
}

/// Up to `limit` items of one partition, across pages.
pub fn read_partition(
    store: &dyn ItemStore,
    pk: &str,
    prefix: Option<&str>,
    limit: usize,
) -> Result<Vec<Value>, CliError> {
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    while items.len() < limit {
        let page_size = (limit - items.len()).min(MAX_PAGE_SIZE);
        let page = store.query(pk, prefix, page_size, cursor.as_deref())?;
        items.extend(page.items.iter().map(|i| Value::Object(i.attrs().clone())));
        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(items)
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Print the number of aggregates of each kind.
pub fn cmd_status(stores: &Stores, json_mode: bool) -> Result<(), CliError> {
    let counts = aggregate_counts(stores)?;
    if json_mode {
        let map: serde_json::Map<String, Value> =
            counts.iter().map(|(k, n)| ((*k).to_string(), json!(n))).collect();
        println!("{}", Value::Object(map));
        return Ok(());
    }

    println!("fleetlink Status");
    println!("================");
    for (kind, count) in &counts {
        println!("  {:<12} {}", kind, count);
    }
    Ok(())
}

/// Aggregate counts keyed by entity tag.
pub fn aggregate_counts(stores: &Stores) -> Result<Vec<(&'static str, usize)>, CliError> {
    let mut counts = Vec::new();
    for kind in [
        EntityKind::Device,
        EntityKind::Sim,
        EntityKind::Install,
        EntityKind::Survey,
    ] {
        let query = Query::scan(kind.pk_prefix(), META_SK);
        counts.push((kind.tag(), count(stores.primary.as_ref(), query)?));
    }
    counts.push((
        EntityKind::Customer.tag(),
        count(
            stores.customers.as_ref(),
            Query::scan(EntityKind::Customer.pk_prefix(), CUSTOMER_SK),
        )?,
    ));
    for kind in EntityKind::REGIONS {
        counts.push((
            kind.tag(),
            count(stores.primary.as_ref(), Query::scan_all(kind.pk_prefix()))?,
        ));
    }
    Ok(counts)
}

fn count(store: &dyn ItemStore, query: Query) -> Result<usize, CliError> {
    let mut total = 0;
    let mut cursor: Option<String> = None;
    loop {
        let page = store.fetch(&query.clone().limit(MAX_PAGE_SIZE).after(cursor))?;
        total += page.items.len();
        match page.next {
            Some(next) => cursor = Some(next),
            None => return Ok(total),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
