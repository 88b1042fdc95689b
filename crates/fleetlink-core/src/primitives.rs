//! # Innate Primitives
//!
//! Hardcoded limits and constants for the fleetlink core.
//!
//! These mirror the capabilities of the underlying keyed store and the
//! bounds the HTTP surface accepts. They are compiled into the binary and
//! are immutable at runtime.

/// Maximum number of operations in a single shared-fate transaction.
///
/// Bulk operations larger than this are decomposed into several
/// transactions whose partial completion is reported to the caller.
pub const MAX_TRANSACT_ITEMS: usize = 25;

/// Maximum number of keys in a single `batch_get`.
pub const MAX_BATCH_GET_KEYS: usize = 100;

/// Maximum page size for `query` and `scan`.
pub const MAX_PAGE_SIZE: usize = 100;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Maximum number of device ids accepted by one link/unlink request.
pub const MAX_LINK_DEVICES: usize = 50;

/// Separator between the parts of a composite key.
pub const KEY_SEPARATOR: char = '#';

/// Sort key of every aggregate metadata record.
pub const META_SK: &str = "META";

/// Sort key of a region-combination lock record.
pub const LOCK_SK: &str = "LOCK";

// =============================================================================
// ATTRIBUTE NAMES
// =============================================================================

/// Partition key attribute.
pub const ATTR_PK: &str = "PK";

/// Sort key attribute.
pub const ATTR_SK: &str = "SK";

/// Record type discriminator written on every item.
pub const ATTR_ENTITY_TYPE: &str = "EntityType";

// =============================================================================
// STATUS VALUES
// =============================================================================

/// Survey status before submission; every field is mutable.
pub const SURVEY_DRAFT: &str = "draft";

/// Survey status after submission; the survey is frozen.
pub const SURVEY_SUBMITTED: &str = "submitted";

/// The only SIM status from which a SIM may be linked.
pub const SIM_ACTIVE: &str = "active";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_limits_are_consistent() {
        assert!(DEFAULT_PAGE_SIZE <= MAX_PAGE_SIZE);
        assert!(MAX_LINK_DEVICES <= MAX_BATCH_GET_KEYS);
    }

    #[test]
    fn transaction_cap_matches_store() {
        assert_eq!(MAX_TRANSACT_ITEMS, 25);
    }
}
