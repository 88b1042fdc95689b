//! # Core Type Definitions
//!
//! This module contains the types shared by every layer of the core:
//! - Item addressing (`ItemKey`) and the untyped record (`Item`)
//! - The acting principal of a mutation (`Actor`)
//! - Paginated list results (`ListPage`)
//! - Time source (`Clock`, `SystemClock`)
//! - Error taxonomy (`FleetError`)
//!
//! ## Ordering Guarantees
//!
//! `ItemKey` orders by `(pk, sk)` byte-wise, which is the order every
//! backend iterates in. Timestamps are rendered with fixed-width
//! microsecond precision so that key order equals chronological order.

use crate::primitives::{ATTR_ENTITY_TYPE, ATTR_PK, ATTR_SK};
use crate::store::StoreError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;

// =============================================================================
// ITEM KEY
// =============================================================================

/// Composite primary key of a stored item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    /// Partition key, e.g. `DEVICE#DEV001`.
    pub pk: String,
    /// Sort key, e.g. `META` or `SIM_ASSOC#SIM001`.
    pub sk: String,
}

impl ItemKey {
    /// Create a new key.
    #[must_use]
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.pk, self.sk)
    }
}

// =============================================================================
// ITEM
// =============================================================================

/// A stored record: an attribute map that always carries `PK` and `SK`.
///
/// Upper layers convert items to typed records with [`Item::to_record`];
/// only the store reads the attribute map directly.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(Map<String, Value>);

impl Item {
    /// Create an empty item addressed by `key` and typed by `entity_type`.
    #[must_use]
    pub fn new(key: &ItemKey, entity_type: &str) -> Self {
        let mut attrs = Map::new();
        attrs.insert(ATTR_PK.to_string(), Value::String(key.pk.clone()));
        attrs.insert(ATTR_SK.to_string(), Value::String(key.sk.clone()));
        attrs.insert(
            ATTR_ENTITY_TYPE.to_string(),
            Value::String(entity_type.to_string()),
        );
        Self(attrs)
    }

    /// Build an item from a serializable record.
    ///
    /// The record must serialize to a JSON object. Key attributes are
    /// written last so a record can never override its own address.
    pub fn from_record<T: Serialize>(
        key: &ItemKey,
        entity_type: &str,
        record: &T,
    ) -> Result<Self, FleetError> {
        let value =
            serde_json::to_value(record).map_err(|e| FleetError::Serialization(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(FleetError::Serialization(format!(
                "{} record is not an object",
                entity_type
            )));
        };
        let mut item = Self(fields);
        item.set(ATTR_PK, Value::String(key.pk.clone()));
        item.set(ATTR_SK, Value::String(key.sk.clone()));
        item.set(ATTR_ENTITY_TYPE, Value::String(entity_type.to_string()));
        Ok(item)
    }

    /// Wrap an attribute map as an item.
    #[must_use]
    pub fn from_attrs(attrs: Map<String, Value>) -> Self {
        Self(attrs)
    }

    /// Decode the item into a typed record. Unknown attributes are ignored.
    pub fn to_record<T: DeserializeOwned>(&self) -> Result<T, FleetError> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| FleetError::Serialization(e.to_string()))
    }

    /// The item's key, if both key attributes are present strings.
    #[must_use]
    pub fn key(&self) -> Option<ItemKey> {
        Some(ItemKey::new(self.get_str(ATTR_PK)?, self.get_str(ATTR_SK)?))
    }

    /// Value of the `SK` attribute.
    #[must_use]
    pub fn sk(&self) -> Option<&str> {
        self.get_str(ATTR_SK)
    }

    /// Value of the `EntityType` attribute.
    #[must_use]
    pub fn entity_type(&self) -> Option<&str> {
        self.get_str(ATTR_ENTITY_TYPE)
    }

    /// Raw attribute lookup.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// String attribute lookup; `None` for absent or non-string values.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// True when the attribute is absent, null, an empty string or an
    /// empty object.
    #[must_use]
    pub fn is_empty_attr(&self, name: &str) -> bool {
        match self.0.get(name) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Object(o)) => o.is_empty(),
            Some(_) => false,
        }
    }

    /// Set an attribute, replacing any previous value.
    pub fn set(&mut self, name: &str, value: Value) {
        self.0.insert(name.to_string(), value);
    }

    /// Remove an attribute.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// Borrow the attribute map.
    #[must_use]
    pub fn attrs(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Client-facing rendering: every attribute except the key pair.
    #[must_use]
    pub fn view(&self) -> Value {
        let mut attrs = self.0.clone();
        attrs.remove(ATTR_PK);
        attrs.remove(ATTR_SK);
        Value::Object(attrs)
    }
}

// =============================================================================
// LIST PAGE
// =============================================================================

/// One page of a list operation as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

impl<T> ListPage<T> {
    /// Wrap items and the store's continuation token.
    #[must_use]
    pub fn new(items: Vec<T>, next_token: Option<String>) -> Self {
        Self {
            items,
            has_more: next_token.is_some(),
            next_token,
        }
    }
}

// =============================================================================
// ACTOR
// =============================================================================

/// The principal performing a mutation, recorded in history entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// User id or service name.
    pub performed_by: String,
    /// Client address, when the boundary knows it.
    pub ip_address: Option<String>,
}

impl Actor {
    /// Create an actor.
    #[must_use]
    pub fn new(performed_by: impl Into<String>, ip_address: Option<String>) -> Self {
        Self {
            performed_by: performed_by.into(),
            ip_address,
        }
    }

    /// The actor used when no identity is supplied.
    #[must_use]
    pub fn system() -> Self {
        Self::new("system", None)
    }
}

// =============================================================================
// CLOCK
// =============================================================================

/// Source of timestamps for created dates and history keys.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Current instant rendered as an ISO-8601 key component.
    fn now_iso(&self) -> String {
        iso_timestamp(self.now())
    }
}

/// Wall clock that never repeats or goes backwards within a process.
///
/// Two history rows for the same device written in the same microsecond
/// would otherwise collide on `DEVICE_HISTORY#{ts}#{deviceId}`.
#[derive(Debug, Default)]
pub struct SystemClock {
    last_micros: AtomicI64,
}

impl SystemClock {
    /// Create a new clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_micros();
        let mut prev = self.last_micros.load(Ordering::Acquire);
        loop {
            let next = if wall > prev {
                wall
            } else {
                prev.saturating_add(1)
            };
            match self.last_micros.compare_exchange_weak(
                prev,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return DateTime::from_timestamp_micros(next).unwrap_or_else(Utc::now),
                Err(current) => prev = current,
            }
        }
    }
}

/// Render a timestamp as fixed-width ISO-8601 with a `Z` suffix.
#[must_use]
pub fn iso_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors produced by the fleetlink core.
///
/// `Validation`, `NotFound`, `Conflict` and `Precondition` are expected
/// outcomes that the boundary translates to 4xx responses. `Transient`,
/// `Store` and `Serialization` are failures that surface as 500.
#[derive(Debug, Error)]
pub enum FleetError {
    /// The request body violates one or more validation rules.
    #[error("{}", .0.join("; "))]
    Validation(Vec<String>),

    /// The target aggregate or sub-entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// An invariant was violated at write time.
    #[error("{message}")]
    Conflict {
        /// Human-readable reason.
        message: String,
        /// Id of the record that won, when known (region lock).
        existing_id: Option<String>,
    },

    /// The current state of a record forbids the operation.
    #[error("{0}")]
    Precondition(String),

    /// The store cancelled a transaction for reasons other than a
    /// failed condition, or throttled the request.
    #[error("Transient store failure: {0}")]
    Transient(String),

    /// Unexpected store failure.
    #[error("Store error: {0}")]
    Store(StoreError),

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl FleetError {
    /// Single-message validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }

    /// `"{kind} {id} not found"`.
    pub fn not_found(kind: &str, id: &str) -> Self {
        Self::NotFound(format!("{} {} not found", kind, id))
    }

    /// Duplicate creation of an aggregate.
    pub fn already_exists(entity: &str, id: &str) -> Self {
        Self::Conflict {
            message: format!("{} with ID {} already exists", entity, id),
            existing_id: None,
        }
    }

    /// Conflict without a winner id.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            existing_id: None,
        }
    }

    /// State-describing precondition failure.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }
}

impl From<StoreError> for FleetError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidCursor(_) => Self::validation("Invalid nextToken"),
            StoreError::TransactionCanceled { .. } => Self::Transient(err.to_string()),
            other => Self::Store(other),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
