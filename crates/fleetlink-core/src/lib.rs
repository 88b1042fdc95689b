//! # fleetlink-core
//!
//! The entity-linking and history core for fleetlink - THE STORE.
//!
//! Devices, SIM cards, installations, customers, surveys and regions all
//! live in one keyed table. Each aggregate is a `META` record plus
//! sub-entities sharing its partition key; relationships between
//! aggregates are pairs of association records written in one store
//! transaction.
//!
//! ## Layers
//!
//! - `store`: the Item Store verb set (memory and redb backends)
//! - `keys`: the Key Codec for every `PK`/`SK` shape
//! - `validate`: declarative field schemas and sanitization
//! - `link`: the Link Manager, owner of every cross-aggregate rule
//! - `services`: per-aggregate create / get / update / delete / list
//!
//! ## Architectural Constraints
//!
//! - Every invariant is enforced by a conditional write, never by a pre-read
//! - Pre-reads only pick the error message
//! - Has NO async, NO network dependencies (pure Rust)

// =============================================================================
// MODULES
// =============================================================================

pub mod keys;
pub mod link;
pub mod primitives;
pub mod query;
pub mod services;
pub mod store;
pub mod types;
pub mod validate;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Actor, Clock, FleetError, Item, ItemKey, ListPage, SystemClock, iso_timestamp,
};

// =============================================================================
// RE-EXPORTS: Store
// =============================================================================

pub use query::{Query, QueryTarget};
pub use store::{
    ItemStore, MemoryStore, Page, Patch, Precondition, RedbStore, StoreError, TransactOp,
};

// =============================================================================
// RE-EXPORTS: Keys, Links, Services
// =============================================================================

pub use keys::{EntityKind, SubKey};
pub use link::{
    ContactLinkOutcome, ContactLinkStatus, HistoryOrder, LinkDirection, LinkManager, LinkReport,
    LinkView, RegionTuple, SimHistoryEntry, SimLink,
};
pub use services::{DeviceChild, Filter, ListOptions, Services};
pub use validate::{Mode, Schema};
