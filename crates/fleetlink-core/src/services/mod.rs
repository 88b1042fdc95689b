//! # Aggregate Services
//!
//! Per-aggregate orchestrators composing the Item Store, the Validator and
//! the Link Manager: create, get, update, cascading delete and paginated
//! list for devices, SIMs, installs, surveys, customers and regions.
//!
//! List filters are applied after the page read; the store does not filter
//! inside a page, so a filtered page may hold fewer than `limit` items
//! while `hasMore` is still true.

pub mod customer;
pub mod device;
pub mod install;
pub mod region;
pub mod sim;
pub mod survey;

pub use customer::CustomerService;
pub use device::{DeviceChild, DeviceService};
pub use install::InstallService;
pub use region::RegionService;
pub use sim::SimService;
pub use survey::SurveyService;

use crate::keys::EntityKind;
use crate::link::LinkManager;
use crate::primitives::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MAX_TRANSACT_ITEMS};
use crate::store::{ItemStore, Patch, Precondition, StoreError, TransactOp};
use crate::{Clock, FleetError, Item, ItemKey, ListPage};
use serde_json::{Map, Value};
use std::sync::Arc;

// =============================================================================
// SERVICES
// =============================================================================

/// Every aggregate service, sharing one store, one customer store and one
/// clock.
#[derive(Debug, Clone)]
pub struct Services {
    pub devices: DeviceService,
    pub sims: SimService,
    pub installs: InstallService,
    pub surveys: SurveyService,
    pub customers: CustomerService,
    pub regions: RegionService,
    pub links: LinkManager,
}

impl Services {
    /// Wire every service. `customers` may be the same store as `store`.
    pub fn new(
        store: Arc<dyn ItemStore>,
        customers: Arc<dyn ItemStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let links = LinkManager::new(store.clone(), customers.clone(), clock.clone());
        let ctx = Context {
            store: store.clone(),
            clock: clock.clone(),
        };
        let customer_ctx = Context {
            store: customers,
            clock,
        };
        Self {
            devices: DeviceService::new(ctx.clone(), links.clone()),
            sims: SimService::new(ctx.clone(), links.clone()),
            installs: InstallService::new(ctx.clone(), links.clone()),
            surveys: SurveyService::new(ctx.clone()),
            customers: CustomerService::new(customer_ctx, links.clone()),
            regions: RegionService::new(ctx),
            links,
        }
    }
}

/// Store and clock handed to each service.
#[derive(Clone)]
pub(crate) struct Context {
    pub(crate) store: Arc<dyn ItemStore>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub(crate) fn now(&self) -> String {
        self.clock.now_iso()
    }

    pub(crate) fn store(&self) -> &dyn ItemStore {
        self.store.as_ref()
    }

    /// Read a required record.
    pub(crate) fn require(&self, key: &ItemKey, kind: &str, id: &str) -> Result<Item, FleetError> {
        self.store()
            .get(key)?
            .ok_or_else(|| FleetError::not_found(kind, id))
    }

    /// Write a new aggregate META.
    pub(crate) fn create_meta(
        &self,
        kind: EntityKind,
        key: &ItemKey,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Item, FleetError> {
        let mut item = Item::new(key, kind.tag());
        for (name, value) in fields {
            item.set(&name, value);
        }
        match self.store().put(item.clone(), Precondition::MustNotExist) {
            Ok(()) => {
                tracing::info!(kind = %kind, id, "aggregate created");
                Ok(item)
            }
            Err(StoreError::Conflict(_)) => Err(FleetError::already_exists(kind.tag(), id)),
            Err(err) => Err(err.into()),
        }
    }

    /// Patch an existing record; a missing record is `NotFound`.
    pub(crate) fn patch_existing(
        &self,
        key: &ItemKey,
        kind: &str,
        id: &str,
        fields: Map<String, Value>,
        updated_attr: &str,
    ) -> Result<Item, FleetError> {
        let patch = Patch::new()
            .set_all(fields)
            .set(updated_attr, self.now());
        self.store()
            .update(key, &patch, Precondition::MustExist)
            .map_err(|err| match err {
                StoreError::PreconditionFailed { .. } => FleetError::not_found(kind, id),
                other => other.into(),
            })
    }
}

// =============================================================================
// IDS
// =============================================================================

/// Take the id from `fields` or allocate one.
pub(crate) fn take_or_generate_id(fields: &mut Map<String, Value>, attr: &str) -> String {
    let id = fields
        .get(attr)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    fields.insert(attr.to_string(), Value::String(id.clone()));
    id
}

/// Set an attribute unless the body already carries it.
pub(crate) fn default_attr(fields: &mut Map<String, Value>, attr: &str, value: &str) {
    if !fields.contains_key(attr) {
        fields.insert(attr.to_string(), Value::String(value.to_string()));
    }
}

// =============================================================================
// LISTING
// =============================================================================

/// Post-read predicate on a listed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// String attribute equals the value.
    Equals { attr: String, value: String },
    /// ISO date attribute is on or after the value.
    From { attr: String, value: String },
    /// ISO date attribute is on or before the value (day-inclusive).
    To { attr: String, value: String },
}

impl Filter {
    /// `Equals` helper.
    pub fn equals(attr: &str, value: impl Into<String>) -> Self {
        Self::Equals {
            attr: attr.to_string(),
            value: value.into(),
        }
    }

    /// True when the item satisfies the predicate. Items lacking the
    /// attribute never match.
    #[must_use]
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            Self::Equals { attr, value } => item.get_str(attr) == Some(value.as_str()),
            Self::From { attr, value } => item
                .get_str(attr)
                .is_some_and(|v| v >= value.as_str()),
            Self::To { attr, value } => item.get_str(attr).is_some_and(|v| {
                let head = v.get(..value.len()).unwrap_or(v);
                head <= value.as_str()
            }),
        }
    }
}

/// Pagination and filter parameters of a list operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub limit: Option<usize>,
    pub next_token: Option<String>,
    pub filters: Vec<Filter>,
}

impl ListOptions {
    /// First page with the default limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the page limit.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Resume after a previous page.
    #[must_use]
    pub fn after(mut self, token: Option<String>) -> Self {
        self.next_token = token;
        self
    }

    /// Add a filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// The validated page size.
    pub fn page_limit(&self) -> Result<usize, FleetError> {
        match self.limit {
            None => Ok(DEFAULT_PAGE_SIZE),
            Some(n) if (1..=MAX_PAGE_SIZE).contains(&n) => Ok(n),
            Some(_) => Err(FleetError::validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_SIZE
            ))),
        }
    }

    fn keep(&self, item: &Item) -> bool {
        self.filters.iter().all(|f| f.matches(item))
    }
}

/// List aggregate METAs of one kind (`{KIND}#*` / `sk`).
pub(crate) fn list_aggregates(
    store: &dyn ItemStore,
    kind: EntityKind,
    sk: &str,
    opts: &ListOptions,
) -> Result<ListPage<Value>, FleetError> {
    let page = store.scan(
        &kind.pk_prefix(),
        sk,
        opts.page_limit()?,
        opts.next_token.as_deref(),
    )?;
    Ok(ListPage::new(
        page.items
            .iter()
            .filter(|i| opts.keep(i))
            .map(Item::view)
            .collect(),
        page.next,
    ))
}

/// List sub-entities under one partition by sort-key prefix.
pub(crate) fn list_children(
    store: &dyn ItemStore,
    pk: &str,
    prefix: &str,
    opts: &ListOptions,
) -> Result<ListPage<Value>, FleetError> {
    let page = store.query(
        pk,
        Some(prefix),
        opts.page_limit()?,
        opts.next_token.as_deref(),
    )?;
    Ok(ListPage::new(
        page.items
            .iter()
            .filter(|i| opts.keep(i))
            .map(Item::view)
            .collect(),
        page.next,
    ))
}

/// Every item under `pk` with the given sort-key prefix, across pages.
pub(crate) fn read_all(
    store: &dyn ItemStore,
    pk: &str,
    prefix: &str,
) -> Result<Vec<Item>, FleetError> {
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = store.query(pk, Some(prefix), MAX_PAGE_SIZE, cursor.as_deref())?;
        items.extend(page.items);
        match page.next {
            Some(next) => cursor = Some(next),
            None => return Ok(items),
        }
    }
}

// =============================================================================
// CASCADE
// =============================================================================

/// Delete every item of `parent`'s partition except `parent` itself, in
/// transactional chunks that each re-check `guard` on the parent.
///
/// Each chunk is idempotent, so a retry after an interrupted cascade
/// resumes where it stopped. The parent is left for the caller to delete.
pub(crate) fn cascade_children(
    store: &dyn ItemStore,
    parent: &ItemKey,
    guard: &Precondition,
) -> Result<usize, StoreError> {
    let mut deleted = 0;
    loop {
        let page = store.query(&parent.pk, None, MAX_PAGE_SIZE, None)?;
        let children: Vec<ItemKey> = page
            .items
            .iter()
            .filter_map(Item::key)
            .filter(|k| k != parent)
            .collect();
        if children.is_empty() {
            break;
        }
        for chunk in children.chunks(MAX_TRANSACT_ITEMS - 1) {
            let mut ops: Vec<TransactOp> = chunk
                .iter()
                .map(|k| TransactOp::delete(k.clone(), Precondition::None))
                .collect();
            ops.push(TransactOp::check(parent.clone(), guard.clone()));
            store.transact(ops)?;
            deleted += chunk.len();
            tracing::debug!(parent = %parent, chunk = chunk.len(), "cascade chunk deleted");
        }
    }
    Ok(deleted)
}

/// Delete a parent and its sub-entities. Condition failures on any chunk
/// or on the parent are returned as `Err(None)` so the caller can decide
/// the message after re-reading.
pub(crate) fn cascade_delete(
    store: &dyn ItemStore,
    parent: &ItemKey,
    guard: Precondition,
) -> Result<usize, Option<FleetError>> {
    let classify = |err: StoreError| {
        if err.is_condition_failure() {
            None
        } else {
            Some(FleetError::from(err))
        }
    };
    let children = cascade_children(store, parent, &guard).map_err(classify)?;
    store.delete(parent, guard).map_err(classify)?;
    tracing::info!(parent = %parent, children, "aggregate deleted");
    Ok(children)
}

// =============================================================================
// TESTS
// =============================================================================
