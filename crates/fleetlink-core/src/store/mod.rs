//! # Item Store
//!
//! A minimal verb set over a keyed record store: conditional puts,
//! attribute-patch updates, prefix queries, and bounded shared-fate
//! transactions.
//!
//! Two backends implement [`ItemStore`]:
//! - [`MemoryStore`]: ordered in-process map (tests, `--backend memory`)
//! - [`RedbStore`]: one table inside a redb database file
//!
//! Both share the condition and patch semantics in this module, so a
//! precondition means exactly the same thing on either backend. Cursor
//! encoding also lives here; no upper layer ever sees a raw key bound.

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::primitives::{ATTR_PK, ATTR_SK, MAX_BATCH_GET_KEYS, MAX_TRANSACT_ITEMS};
use crate::query::{Query, Step};
use crate::{Item, ItemKey};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

// =============================================================================
// ERRORS
// =============================================================================

/// Reason one operation of a cancelled transaction failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// The operation's precondition did not hold.
    ConditionFailed(String),
}

/// Errors raised by the Item Store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A `MustNotExist` precondition found an existing item.
    #[error("Item already exists: {0}")]
    Conflict(ItemKey),

    /// Any other precondition did not hold.
    #[error("Precondition failed on {key}: {reason}")]
    PreconditionFailed { key: ItemKey, reason: String },

    /// A transaction was rolled back; one reason slot per operation.
    #[error(
        "Transaction cancelled: {} of {} operation(s) failed their condition",
        .reasons.iter().flatten().count(),
        .reasons.len()
    )]
    TransactionCanceled { reasons: Vec<Option<CancelReason>> },

    /// The request is malformed (too many items, duplicate keys, ...).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A continuation token could not be decoded.
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// The underlying database failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// A stored item could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Indices of transaction operations whose condition failed.
    #[must_use]
    pub fn failed_ops(&self) -> Vec<usize> {
        match self {
            Self::TransactionCanceled { reasons } => reasons
                .iter()
                .enumerate()
                .filter_map(|(i, r)| r.as_ref().map(|_| i))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// True for a rolled-back transaction or a failed single-item condition.
    #[must_use]
    pub fn is_condition_failure(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_) | Self::PreconditionFailed { .. } | Self::TransactionCanceled { .. }
        )
    }
}

pub(crate) fn io_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Io(e.to_string())
}

// =============================================================================
// PRECONDITIONS
// =============================================================================

/// Predicate on the current item that must hold at write time.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// Unconditional write.
    None,
    /// No item exists at the key.
    MustNotExist,
    /// An item exists at the key.
    MustExist,
    /// The item exists and the attribute equals the value.
    AttrEquals(String, Value),
    /// The attribute is absent, null or empty (true for a missing item).
    AttrEmpty(String),
    /// The item exists and the counter attribute is absent or zero.
    CounterZero(String),
    /// Every member holds; evaluated in order.
    All(Vec<Precondition>),
}

/// Why a precondition did not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionFailure {
    /// `MustNotExist` found an item.
    Exists,
    /// The item is missing.
    Missing,
    /// An attribute predicate did not hold.
    Attribute(String),
}

impl ConditionFailure {
    fn describe(&self) -> String {
        match self {
            Self::Exists => "item exists".to_string(),
            Self::Missing => "item does not exist".to_string(),
            Self::Attribute(detail) => detail.clone(),
        }
    }

    fn into_store_error(self, key: ItemKey) -> StoreError {
        match self {
            Self::Exists => StoreError::Conflict(key),
            other => StoreError::PreconditionFailed {
                key,
                reason: other.describe(),
            },
        }
    }
}

impl Precondition {
    /// `AttrEquals` helper.
    pub fn attr_equals(name: &str, value: impl Into<Value>) -> Self {
        Self::AttrEquals(name.to_string(), value.into())
    }

    /// `AttrEmpty` helper.
    pub fn attr_empty(name: &str) -> Self {
        Self::AttrEmpty(name.to_string())
    }

    /// `CounterZero` helper.
    pub fn counter_zero(name: &str) -> Self {
        Self::CounterZero(name.to_string())
    }

    /// Evaluate against the current item (if any).
    pub fn evaluate(&self, current: Option<&Item>) -> Result<(), ConditionFailure> {
        match self {
            Self::None => Ok(()),
            Self::MustNotExist => match current {
                Some(_) => Err(ConditionFailure::Exists),
                None => Ok(()),
            },
            Self::MustExist => match current {
                Some(_) => Ok(()),
                None => Err(ConditionFailure::Missing),
            },
            Self::AttrEquals(name, expected) => {
                let item = current.ok_or(ConditionFailure::Missing)?;
                match item.get(name) {
                    Some(actual) if actual == expected => Ok(()),
                    actual => Err(ConditionFailure::Attribute(format!(
                        "{} is {} (expected {})",
                        name,
                        actual.map_or_else(|| "absent".to_string(), Value::to_string),
                        expected
                    ))),
                }
            }
            Self::AttrEmpty(name) => match current {
                Some(item) if !item.is_empty_attr(name) => {
                    Err(ConditionFailure::Attribute(format!("{} is not empty", name)))
                }
                _ => Ok(()),
            },
            Self::CounterZero(name) => {
                let item = current.ok_or(ConditionFailure::Missing)?;
                match item.get(name) {
                    None | Some(Value::Null) => Ok(()),
                    Some(count) if count.as_i64() == Some(0) => Ok(()),
                    Some(count) => Err(ConditionFailure::Attribute(format!(
                        "{} is {}",
                        name, count
                    ))),
                }
            }
            Self::All(members) => members.iter().try_for_each(|c| c.evaluate(current)),
        }
    }
}

// =============================================================================
// PATCHES
// =============================================================================

/// Attribute patch applied by `update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    /// Attributes to set.
    pub set: Map<String, Value>,
    /// Attributes to remove.
    pub remove: Vec<String>,
    /// Values appended to list attributes (created when absent).
    pub append: Vec<(String, Value)>,
    /// Deltas added to integer attributes (absent counts as zero).
    pub add: Vec<(String, i64)>,
}

impl Patch {
    /// Empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one attribute.
    #[must_use]
    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set.insert(name.to_string(), value.into());
        self
    }

    /// Set every attribute of a map.
    #[must_use]
    pub fn set_all(mut self, fields: Map<String, Value>) -> Self {
        self.set.extend(fields);
        self
    }

    /// Remove one attribute.
    #[must_use]
    pub fn remove(mut self, name: &str) -> Self {
        self.remove.push(name.to_string());
        self
    }

    /// Append a value to a list attribute.
    #[must_use]
    pub fn append(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.append.push((name.to_string(), value.into()));
        self
    }

    /// Add a delta to an integer attribute.
    #[must_use]
    pub fn add(mut self, name: &str, delta: i64) -> Self {
        self.add.push((name.to_string(), delta));
        self
    }

    /// True when the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.remove.is_empty()
            && self.append.is_empty()
            && self.add.is_empty()
    }

    /// Apply to an item in place.
    pub fn apply(&self, item: &mut Item) -> Result<(), StoreError> {
        let touches_key = |name: &str| name == ATTR_PK || name == ATTR_SK;
        if self.set.keys().any(|n| touches_key(n))
            || self.remove.iter().any(|n| touches_key(n))
            || self.append.iter().any(|(n, _)| touches_key(n))
            || self.add.iter().any(|(n, _)| touches_key(n))
        {
            return Err(StoreError::InvalidRequest(
                "key attributes cannot be patched".to_string(),
            ));
        }

        for (name, value) in &self.set {
            item.set(name, value.clone());
        }
        for name in &self.remove {
            item.remove(name);
        }
        for (name, value) in &self.append {
            let list = match item.remove(name) {
                None | Some(Value::Null) => vec![value.clone()],
                Some(Value::Array(mut existing)) => {
                    existing.push(value.clone());
                    existing
                }
                Some(other) => {
                    item.set(name, other);
                    return Err(StoreError::InvalidRequest(format!(
                        "cannot append to non-list attribute {}",
                        name
                    )));
                }
            };
            item.set(name, Value::Array(list));
        }
        for (name, delta) in &self.add {
            let current = match item.get(name) {
                None | Some(Value::Null) => 0,
                Some(value) => value.as_i64().ok_or_else(|| {
                    StoreError::InvalidRequest(format!(
                        "cannot add to non-integer attribute {}",
                        name
                    ))
                })?,
            };
            let next = current.checked_add(*delta).ok_or_else(|| {
                StoreError::InvalidRequest(format!("counter {} overflowed", name))
            })?;
            item.set(name, Value::from(next));
        }
        Ok(())
    }
}

// =============================================================================
// TRANSACTIONS
// =============================================================================

/// One operation of a shared-fate transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactOp {
    /// Write a whole item.
    Put { item: Item, condition: Precondition },
    /// Patch an item.
    Update {
        key: ItemKey,
        patch: Patch,
        condition: Precondition,
    },
    /// Remove an item.
    Delete {
        key: ItemKey,
        condition: Precondition,
    },
    /// Assert a condition without writing.
    ConditionCheck {
        key: ItemKey,
        condition: Precondition,
    },
}

impl TransactOp {
    /// `Put` helper.
    #[must_use]
    pub fn put(item: Item, condition: Precondition) -> Self {
        Self::Put { item, condition }
    }

    /// `Update` helper.
    #[must_use]
    pub fn update(key: ItemKey, patch: Patch, condition: Precondition) -> Self {
        Self::Update {
            key,
            patch,
            condition,
        }
    }

    /// `Delete` helper.
    #[must_use]
    pub fn delete(key: ItemKey, condition: Precondition) -> Self {
        Self::Delete { key, condition }
    }

    /// `ConditionCheck` helper.
    #[must_use]
    pub fn check(key: ItemKey, condition: Precondition) -> Self {
        Self::ConditionCheck { key, condition }
    }

    /// Key the operation targets.
    pub fn key(&self) -> Result<ItemKey, StoreError> {
        match self {
            Self::Put { item, .. } => item_key(item),
            Self::Update { key, .. } | Self::Delete { key, .. } | Self::ConditionCheck { key, .. } => {
                Ok(key.clone())
            }
        }
    }

    fn condition(&self) -> &Precondition {
        match self {
            Self::Put { condition, .. }
            | Self::Update { condition, .. }
            | Self::Delete { condition, .. }
            | Self::ConditionCheck { condition, .. } => condition,
        }
    }
}

fn item_key(item: &Item) -> Result<ItemKey, StoreError> {
    item.key()
        .ok_or_else(|| StoreError::InvalidRequest("item is missing PK or SK".to_string()))
}

// =============================================================================
// PAGES & CURSORS
// =============================================================================

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Items in iteration order.
    pub items: Vec<Item>,
    /// Continuation token; present only when more items exist.
    pub next: Option<String>,
}

/// Last evaluated key, serialized into the opaque token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Cursor {
    pk: String,
    sk: String,
}

/// Encode a last-evaluated key as a URL-safe token.
pub(crate) fn encode_cursor(key: &ItemKey) -> Result<String, StoreError> {
    let cursor = Cursor {
        pk: key.pk.clone(),
        sk: key.sk.clone(),
    };
    let bytes = postcard::to_allocvec(&cursor)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Decode a token produced by [`encode_cursor`].
pub(crate) fn decode_cursor(token: &str) -> Result<ItemKey, StoreError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(|e| StoreError::InvalidCursor(e.to_string()))?;
    let cursor: Cursor =
        postcard::from_bytes(&bytes).map_err(|e| StoreError::InvalidCursor(e.to_string()))?;
    Ok(ItemKey::new(cursor.pk, cursor.sk))
}

/// Accumulates one page while a backend iterates its key range.
pub(crate) struct PageBuilder {
    limit: usize,
    items: Vec<Item>,
    last: Option<ItemKey>,
    has_more: bool,
}

impl PageBuilder {
    pub(crate) fn new(query: &Query) -> Self {
        Self {
            limit: query.effective_limit(),
            items: Vec::new(),
            last: None,
            has_more: false,
        }
    }

    /// Offer a visited key. Returns `false` when iteration should stop.
    /// `decode` runs only for keys that are taken.
    pub(crate) fn offer(
        &mut self,
        query: &Query,
        key: ItemKey,
        decode: impl FnOnce() -> Result<Item, StoreError>,
    ) -> Result<bool, StoreError> {
        match query.step(&key) {
            Step::Stop => Ok(false),
            Step::Skip => Ok(true),
            Step::Take if self.items.len() >= self.limit => {
                self.has_more = true;
                Ok(false)
            }
            Step::Take => {
                self.items.push(decode()?);
                self.last = Some(key);
                Ok(true)
            }
        }
    }

    pub(crate) fn finish(self) -> Result<Page, StoreError> {
        let next = match (self.has_more, self.last) {
            (true, Some(last)) => Some(encode_cursor(&last)?),
            _ => None,
        };
        Ok(Page {
            items: self.items,
            next,
        })
    }
}

// =============================================================================
// SHARED WRITE SEMANTICS
// =============================================================================

/// Row-level access a backend exposes inside one atomic write scope.
pub(crate) trait TableAccess {
    fn read(&self, key: &ItemKey) -> Result<Option<Item>, StoreError>;
    fn write(&mut self, key: &ItemKey, item: &Item) -> Result<(), StoreError>;
    fn erase(&mut self, key: &ItemKey) -> Result<(), StoreError>;
}

pub(crate) fn put_in<T: TableAccess>(
    table: &mut T,
    item: Item,
    condition: &Precondition,
) -> Result<(), StoreError> {
    let key = item_key(&item)?;
    let current = table.read(&key)?;
    condition
        .evaluate(current.as_ref())
        .map_err(|f| f.into_store_error(key.clone()))?;
    table.write(&key, &item)
}

pub(crate) fn update_in<T: TableAccess>(
    table: &mut T,
    key: &ItemKey,
    patch: &Patch,
    condition: &Precondition,
) -> Result<Item, StoreError> {
    let current = table.read(key)?;
    condition
        .evaluate(current.as_ref())
        .map_err(|f| f.into_store_error(key.clone()))?;
    let mut item = current.unwrap_or_else(|| blank_item(key));
    patch.apply(&mut item)?;
    table.write(key, &item)?;
    Ok(item)
}

pub(crate) fn delete_in<T: TableAccess>(
    table: &mut T,
    key: &ItemKey,
    condition: &Precondition,
) -> Result<Option<Item>, StoreError> {
    let current = table.read(key)?;
    condition
        .evaluate(current.as_ref())
        .map_err(|f| f.into_store_error(key.clone()))?;
    if current.is_some() {
        table.erase(key)?;
    }
    Ok(current)
}

/// Check shape limits shared by every backend before opening a write scope.
pub(crate) fn validate_transact(ops: &[TransactOp]) -> Result<(), StoreError> {
    if ops.len() > MAX_TRANSACT_ITEMS {
        return Err(StoreError::InvalidRequest(format!(
            "transaction has {} operations; the limit is {}",
            ops.len(),
            MAX_TRANSACT_ITEMS
        )));
    }
    let mut seen = BTreeSet::new();
    for op in ops {
        let key = op.key()?;
        if !seen.insert(key.clone()) {
            return Err(StoreError::InvalidRequest(format!(
                "transaction touches {} more than once",
                key
            )));
        }
    }
    Ok(())
}

/// Evaluate every condition and stage every write, then apply. Nothing is
/// written unless all conditions hold and every patch applies cleanly.
pub(crate) fn transact_in<T: TableAccess>(
    table: &mut T,
    ops: &[TransactOp],
) -> Result<(), StoreError> {
    enum Staged {
        Write(ItemKey, Item),
        Erase(ItemKey),
        Nothing,
    }

    let mut reasons = Vec::with_capacity(ops.len());
    let mut staged = Vec::with_capacity(ops.len());
    for op in ops {
        let key = op.key()?;
        let current = table.read(&key)?;
        match op.condition().evaluate(current.as_ref()) {
            Ok(()) => reasons.push(None),
            Err(failure) => reasons.push(Some(CancelReason::ConditionFailed(failure.describe()))),
        }
        let step = match op {
            TransactOp::Put { item, .. } => Staged::Write(key, item.clone()),
            TransactOp::Update { patch, .. } => {
                let mut item = current.unwrap_or_else(|| blank_item(&key));
                patch.apply(&mut item)?;
                Staged::Write(key, item)
            }
            TransactOp::Delete { .. } if current.is_some() => Staged::Erase(key),
            TransactOp::Delete { .. } | TransactOp::ConditionCheck { .. } => Staged::Nothing,
        };
        staged.push(step);
    }

    if reasons.iter().any(Option::is_some) {
        return Err(StoreError::TransactionCanceled { reasons });
    }

    for step in staged {
        match step {
            Staged::Write(key, item) => table.write(&key, &item)?,
            Staged::Erase(key) => table.erase(&key)?,
            Staged::Nothing => {}
        }
    }
    Ok(())
}

fn blank_item(key: &ItemKey) -> Item {
    let mut fresh = Item::default();
    fresh.set(ATTR_PK, Value::String(key.pk.clone()));
    fresh.set(ATTR_SK, Value::String(key.sk.clone()));
    fresh
}

pub(crate) fn validate_batch_get(keys: &[ItemKey]) -> Result<(), StoreError> {
    if keys.len() > MAX_BATCH_GET_KEYS {
        return Err(StoreError::InvalidRequest(format!(
            "batch_get of {} keys exceeds the limit of {}",
            keys.len(),
            MAX_BATCH_GET_KEYS
        )));
    }
    Ok(())
}

// =============================================================================
// ITEM STORE TRAIT
// =============================================================================

/// The keyed record store every upper layer talks to.
pub trait ItemStore: Send + Sync + std::fmt::Debug {
    /// Read one item.
    fn get(&self, key: &ItemKey) -> Result<Option<Item>, StoreError>;

    /// Write a whole item if `condition` holds.
    fn put(&self, item: Item, condition: Precondition) -> Result<(), StoreError>;

    /// Patch an item if `condition` holds; returns the post-image.
    fn update(
        &self,
        key: &ItemKey,
        patch: &Patch,
        condition: Precondition,
    ) -> Result<Item, StoreError>;

    /// Remove an item if `condition` holds; returns the pre-image.
    fn delete(&self, key: &ItemKey, condition: Precondition) -> Result<Option<Item>, StoreError>;

    /// Execute a structured query.
    fn fetch(&self, query: &Query) -> Result<Page, StoreError>;

    /// Apply up to 25 operations with shared fate.
    fn transact(&self, ops: Vec<TransactOp>) -> Result<(), StoreError>;

    /// Read up to 100 keys; absent keys are omitted from the result.
    fn batch_get(&self, keys: &[ItemKey]) -> Result<BTreeMap<ItemKey, Item>, StoreError>;

    /// Items under `pk`, optionally restricted to an `SK` prefix.
    fn query(
        &self,
        pk: &str,
        sk_prefix: Option<&str>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<Page, StoreError> {
        let mut query = Query::partition(pk)
            .limit(limit)
            .after(cursor.map(str::to_string));
        if let Some(prefix) = sk_prefix {
            query = query.with_prefix(prefix);
        }
        self.fetch(&query)
    }

    /// Items across partitions starting with `pk_prefix` whose `SK` is `sk`.
    fn scan(
        &self,
        pk_prefix: &str,
        sk: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<Page, StoreError> {
        self.fetch(
            &Query::scan(pk_prefix, sk)
                .limit(limit)
                .after(cursor.map(str::to_string)),
        )
    }

    /// First item under `pk` with the given `SK` prefix.
    fn first_with_prefix(&self, pk: &str, sk_prefix: &str) -> Result<Option<Item>, StoreError> {
        Ok(self
            .query(pk, Some(sk_prefix), 1, None)?
            .items
            .into_iter()
            .next())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(pk: &str, sk: &str) -> Item {
        Item::new(&ItemKey::new(pk, sk), "TEST")
    }

    #[test]
    fn must_not_exist_maps_to_conflict() {
        let failure = Precondition::MustNotExist
            .evaluate(Some(&item("A", "B")))
            .expect_err("should fail");
        assert!(matches!(
            failure.into_store_error(ItemKey::new("A", "B")),
            StoreError::Conflict(_)
        ));
    }

    #[test]
    fn attr_equals_requires_item() {
        let cond = Precondition::attr_equals("Status", "draft");
        assert_eq!(cond.evaluate(None), Err(ConditionFailure::Missing));

        let mut it = item("SURVEY#1", "META");
        it.set("Status", json!("draft"));
        assert!(cond.evaluate(Some(&it)).is_ok());
        it.set("Status", json!("submitted"));
        assert!(matches!(
            cond.evaluate(Some(&it)),
            Err(ConditionFailure::Attribute(_))
        ));
    }

    #[test]
    fn attr_empty_holds_for_missing_item() {
        assert!(Precondition::attr_empty("X").evaluate(None).is_ok());
    }

    #[test]
    fn all_reports_first_failure() {
        let cond = Precondition::All(vec![
            Precondition::MustExist,
            Precondition::attr_empty("linkedDeviceId"),
        ]);
        assert_eq!(cond.evaluate(None), Err(ConditionFailure::Missing));
    }

    #[test]
    fn patch_appends_and_removes() {
        let mut it = item("SIM#1", "META");
        it.set("linkedDeviceId", json!("D1"));
        Patch::new()
            .remove("linkedDeviceId")
            .append("changeHistory", json!({"action": "unlinked"}))
            .append("changeHistory", json!({"action": "linked"}))
            .apply(&mut it)
            .expect("apply");
        assert!(it.get("linkedDeviceId").is_none());
        assert_eq!(
            it.get("changeHistory"),
            Some(&json!([{"action": "unlinked"}, {"action": "linked"}]))
        );
    }

    #[test]
    fn patch_add_counts_from_absent() {
        let mut it = item("INSTALL#1", "META");
        Patch::new().add("LinkedDeviceCount", 1).apply(&mut it).expect("first");
        Patch::new().add("LinkedDeviceCount", 1).apply(&mut it).expect("second");
        Patch::new().add("LinkedDeviceCount", -1).apply(&mut it).expect("third");
        assert_eq!(it.get("LinkedDeviceCount"), Some(&json!(1)));

        it.set("Name", json!("x"));
        let err = Patch::new().add("Name", 1).apply(&mut it).expect_err("not a number");
        assert!(matches!(err, StoreError::InvalidRequest(_)));
    }

    #[test]
    fn counter_zero_treats_absent_as_zero() {
        let cond = Precondition::counter_zero("ChildCount");
        assert_eq!(cond.evaluate(None), Err(ConditionFailure::Missing));

        let mut it = item("REGION#STATE", "META");
        assert!(cond.evaluate(Some(&it)).is_ok());
        it.set("ChildCount", json!(0));
        assert!(cond.evaluate(Some(&it)).is_ok());
        it.set("ChildCount", json!(2));
        assert!(matches!(
            cond.evaluate(Some(&it)),
            Err(ConditionFailure::Attribute(_))
        ));
    }

    #[test]
    fn patch_cannot_touch_keys() {
        let mut it = item("A", "B");
        let err = Patch::new().set("PK", "Z").apply(&mut it).expect_err("reject");
        assert!(matches!(err, StoreError::InvalidRequest(_)));
    }

    #[test]
    fn cursor_round_trip() {
        let key = ItemKey::new("DEVICE#D1", "CONFIG#v1#2024-01-01T00:00:00Z");
        let token = encode_cursor(&key).expect("encode");
        assert!(!token.contains('='));
        assert_eq!(decode_cursor(&token).expect("decode"), key);
    }

    #[test]
    fn garbage_cursor_is_rejected() {
        assert!(matches!(
            decode_cursor("!!not-base64!!"),
            Err(StoreError::InvalidCursor(_))
        ));
    }

    #[test]
    fn transact_rejects_duplicate_keys() {
        let ops = vec![
            TransactOp::put(item("A", "B"), Precondition::None),
            TransactOp::delete(ItemKey::new("A", "B"), Precondition::None),
        ];
        assert!(matches!(
            validate_transact(&ops),
            Err(StoreError::InvalidRequest(_))
        ));
    }

    #[test]
    fn failed_ops_lists_indices() {
        let err = StoreError::TransactionCanceled {
            reasons: vec![
                None,
                Some(CancelReason::ConditionFailed("x".into())),
                None,
            ],
        };
        assert_eq!(err.failed_ops(), vec![1]);
    }
}
