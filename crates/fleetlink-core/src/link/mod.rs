//! # Link Manager
//!
//! Creates, removes and queries the bidirectional associations between
//! aggregates:
//! - SIM ↔ Device (1:1), in [`sim`]
//! - Install ↔ Device (1:N), in [`install`]
//! - Install ↔ Contact (N:M within one customer), in [`contact`]
//! - the install region lock, in [`region`]
//!
//! Every link is a pair of sub-entities written in one store transaction
//! whose conditions encode the cardinality rules. Pre-reads only select
//! the error message; the conditions decide the outcome, so two racing
//! callers can never both win.

pub mod contact;
pub mod install;
pub mod region;
pub mod sim;

pub use contact::{ContactLinkOutcome, ContactLinkStatus};
pub use install::HistoryOrder;
pub use region::RegionTuple;
pub use sim::{SimHistoryEntry, SimLink};

use crate::keys::validate_part;
use crate::primitives::MAX_LINK_DEVICES;
use crate::store::ItemStore;
use crate::{Actor, Clock, FleetError, Item};
use serde::Serialize;
use serde::ser::SerializeMap;
use serde_json::{Map, Value};
use std::sync::Arc;

// =============================================================================
// LINK MANAGER
// =============================================================================

/// Mediator for every cross-aggregate link.
///
/// `store` holds devices, SIMs, installs and their sub-entities;
/// `customers` holds customer records and their contacts. Both may be the
/// same store.
#[derive(Clone)]
pub struct LinkManager {
    store: Arc<dyn ItemStore>,
    customers: Arc<dyn ItemStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LinkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkManager")
            .field("store", &self.store)
            .field("customers", &self.customers)
            .finish_non_exhaustive()
    }
}

impl LinkManager {
    /// Create a link manager.
    pub fn new(
        store: Arc<dyn ItemStore>,
        customers: Arc<dyn ItemStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            customers,
            clock,
        }
    }

    pub(crate) fn store(&self) -> &dyn ItemStore {
        self.store.as_ref()
    }

    pub(crate) fn now_iso(&self) -> String {
        self.clock.now_iso()
    }
}

// =============================================================================
// BULK LINK REPORT
// =============================================================================

/// Direction of a bulk link operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    Link,
    Unlink,
}

impl LinkDirection {
    fn field(self) -> &'static str {
        match self {
            Self::Link => "linked",
            Self::Unlink => "unlinked",
        }
    }
}

/// A device the bulk operation changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkOutcome {
    pub device_id: String,
    pub status: String,
}

/// A device the bulk operation rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkFailure {
    pub device_id: String,
    pub error: String,
}

/// Partial-success result of `link_devices` / `unlink_devices`.
///
/// Serializes as `{"installId", "linked"|"unlinked": [...], "errors": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReport {
    pub install_id: String,
    pub direction: LinkDirection,
    pub succeeded: Vec<LinkOutcome>,
    pub errors: Vec<LinkFailure>,
}

impl LinkReport {
    fn new(install_id: &str, direction: LinkDirection) -> Self {
        Self {
            install_id: install_id.to_string(),
            direction,
            succeeded: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn ok(&mut self, device_id: &str) {
        self.succeeded.push(LinkOutcome {
            device_id: device_id.to_string(),
            status: self.direction.field().to_string(),
        });
    }

    fn fail(&mut self, device_id: &str, error: impl Into<String>) {
        self.errors.push(LinkFailure {
            device_id: device_id.to_string(),
            error: error.into(),
        });
    }

    /// Ids of devices the operation changed.
    #[must_use]
    pub fn succeeded_ids(&self) -> Vec<&str> {
        self.succeeded.iter().map(|o| o.device_id.as_str()).collect()
    }
}

impl Serialize for LinkReport {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("installId", &self.install_id)?;
        map.serialize_entry(self.direction.field(), &self.succeeded)?;
        map.serialize_entry("errors", &self.errors)?;
        map.end()
    }
}

// =============================================================================
// SHARED HELPERS
// =============================================================================

/// Association joined with the record it points at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkView {
    /// The association sub-entity.
    pub association: Value,
    /// The linked aggregate's metadata, when it still exists.
    pub target: Option<Value>,
}

/// Validate, dedupe (order-preserving) and bound a device id list.
pub(crate) fn normalize_device_ids(ids: &[String]) -> Result<Vec<String>, FleetError> {
    if ids.is_empty() {
        return Err(FleetError::validation("deviceIds must be a non-empty array"));
    }
    let mut unique: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        let id = id.trim();
        if !unique.iter().any(|u| u == id) {
            unique.push(id.to_string());
        }
    }
    if unique.len() > MAX_LINK_DEVICES {
        return Err(FleetError::validation(format!(
            "Cannot process more than {} devices at once",
            MAX_LINK_DEVICES
        )));
    }
    let errors: Vec<String> = unique
        .iter()
        .filter_map(|id| validate_part("deviceId", id).err())
        .collect();
    if !errors.is_empty() {
        return Err(FleetError::Validation(errors));
    }
    Ok(unique)
}

/// Reject ids that cannot be used as key parts.
pub(crate) fn check_id(field: &str, id: &str) -> Result<(), FleetError> {
    validate_part(field, id).map_err(FleetError::validation)
}

/// Attributes of a history or association row recording who acted.
pub(crate) fn actor_attrs(actor: &Actor, attrs: &mut Map<String, Value>) {
    attrs.insert(
        "PerformedBy".to_string(),
        Value::String(actor.performed_by.clone()),
    );
    if let Some(ip) = &actor.ip_address {
        attrs.insert("IpAddress".to_string(), Value::String(ip.clone()));
    }
}

pub(crate) fn view_of(item: Option<&Item>) -> Option<Value> {
    item.map(Item::view)
}

// =============================================================================
// TESTS
// =============================================================================
