//! # Query Module
//!
//! Structured read requests for the Item Store.
//!
//! - `Partition`: every item under one `PK`, optionally restricted to an
//!   `SK` prefix, in ascending or descending key order.
//! - `Scan`: every item whose `PK` starts with a prefix and whose `SK`
//!   equals a fixed value; this is how collections of aggregates
//!   (`DEVICE#*` / `META`) are listed.
//!
//! Both are bounded by a page limit and resume from an opaque cursor.

use crate::ItemKey;
use crate::primitives::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use std::ops::Bound;

/// What a query reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTarget {
    /// Items of a single partition.
    Partition {
        pk: String,
        sk_prefix: Option<String>,
    },

    /// Items across partitions sharing a `PK` prefix, filtered by exact `SK`
    /// when one is given.
    Scan {
        pk_prefix: String,
        sk: Option<String>,
    },
}

/// Decision for one key visited by a backend iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The key matches; include the item.
    Take,
    /// The key is inside the iteration range but does not match.
    Skip,
    /// The key is past the end of the range; stop iterating.
    Stop,
}

/// A structured, paginated read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// The item set to read.
    pub target: QueryTarget,
    /// Maximum items per page, clamped to `1..=MAX_PAGE_SIZE`.
    pub limit: usize,
    /// Opaque continuation token from a previous page.
    pub cursor: Option<String>,
    /// Iterate in descending key order (partition queries only).
    pub descending: bool,
}

impl Query {
    /// Read one partition.
    #[must_use]
    pub fn partition(pk: impl Into<String>) -> Self {
        Self {
            target: QueryTarget::Partition {
                pk: pk.into(),
                sk_prefix: None,
            },
            limit: DEFAULT_PAGE_SIZE,
            cursor: None,
            descending: false,
        }
    }

    /// Read every partition starting with `pk_prefix`, keeping items whose
    /// sort key equals `sk`.
    #[must_use]
    pub fn scan(pk_prefix: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            target: QueryTarget::Scan {
                pk_prefix: pk_prefix.into(),
                sk: Some(sk.into()),
            },
            limit: DEFAULT_PAGE_SIZE,
            cursor: None,
            descending: false,
        }
    }

    /// Read every item of every partition starting with `pk_prefix`.
    #[must_use]
    pub fn scan_all(pk_prefix: impl Into<String>) -> Self {
        Self {
            target: QueryTarget::Scan {
                pk_prefix: pk_prefix.into(),
                sk: None,
            },
            limit: DEFAULT_PAGE_SIZE,
            cursor: None,
            descending: false,
        }
    }

    /// Restrict a partition query to a sort-key prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        if let QueryTarget::Partition { sk_prefix, .. } = &mut self.target {
            *sk_prefix = Some(prefix.into());
        }
        self
    }

    /// Set the page limit.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Resume after a previous page.
    #[must_use]
    pub fn after(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Iterate newest-first.
    #[must_use]
    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    /// The limit actually applied.
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }

    fn sk_prefix(&self) -> &str {
        match &self.target {
            QueryTarget::Partition { sk_prefix, .. } => sk_prefix.as_deref().unwrap_or(""),
            QueryTarget::Scan { .. } => "",
        }
    }

    /// Key range a backend should iterate, given the decoded cursor.
    ///
    /// Returns `None` when the range is empty (e.g. a cursor that lies
    /// outside the query's own range).
    #[must_use]
    pub fn bounds(&self, cursor: Option<&ItemKey>) -> Option<(Bound<ItemKey>, Bound<ItemKey>)> {
        let start = match &self.target {
            QueryTarget::Partition { pk, .. } => ItemKey::new(pk.clone(), self.sk_prefix()),
            QueryTarget::Scan { pk_prefix, .. } => ItemKey::new(pk_prefix.clone(), ""),
        };

        if self.descending {
            let QueryTarget::Partition { pk, .. } = &self.target else {
                return None;
            };
            // Every key of `pk` sorts below (pk + NUL, "").
            let upper = match cursor {
                Some(c) if *c < start => return None,
                Some(c) => Bound::Excluded(c.clone()),
                None => Bound::Excluded(ItemKey::new(format!("{}\0", pk), "")),
            };
            return Some((Bound::Included(start), upper));
        }

        let lower = match cursor {
            Some(c) if *c < start => return None,
            Some(c) => Bound::Excluded(c.clone()),
            None => Bound::Included(start),
        };
        Some((lower, Bound::Unbounded))
    }

    /// Classify a key visited in iteration order.
    #[must_use]
    pub fn step(&self, key: &ItemKey) -> Step {
        match &self.target {
            QueryTarget::Partition { pk, .. } => {
                let prefix = self.sk_prefix();
                if key.pk != *pk {
                    return Step::Stop;
                }
                if key.sk.starts_with(prefix) {
                    Step::Take
                } else if self.descending && key.sk.as_str() > prefix {
                    Step::Skip
                } else {
                    Step::Stop
                }
            }
            QueryTarget::Scan { pk_prefix, sk } => {
                if !key.pk.starts_with(pk_prefix.as_str()) {
                    Step::Stop
                } else if sk.as_ref().is_none_or(|sk| key.sk == *sk) {
                    Step::Take
                } else {
                    Step::Skip
                }
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped() {
        assert_eq!(Query::partition("A").limit(0).effective_limit(), 1);
        assert_eq!(Query::partition("A").limit(500).effective_limit(), 100);
        assert_eq!(Query::partition("A").effective_limit(), 50);
    }

    #[test]
    fn partition_step_stops_outside_prefix() {
        let q = Query::partition("DEVICE#D1").with_prefix("CONFIG#");
        assert_eq!(q.step(&ItemKey::new("DEVICE#D1", "CONFIG#1#x")), Step::Take);
        assert_eq!(q.step(&ItemKey::new("DEVICE#D1", "META")), Step::Stop);
        assert_eq!(q.step(&ItemKey::new("DEVICE#D2", "CONFIG#1")), Step::Stop);
    }

    #[test]
    fn descending_skips_keys_above_prefix() {
        let q = Query::partition("INSTALL#I1")
            .with_prefix("DEVICE_HISTORY#")
            .descending();
        assert_eq!(q.step(&ItemKey::new("INSTALL#I1", "META")), Step::Skip);
        assert_eq!(
            q.step(&ItemKey::new("INSTALL#I1", "DEVICE_HISTORY#2024")),
            Step::Take
        );
        assert_eq!(
            q.step(&ItemKey::new("INSTALL#I1", "DEVICE_ASSOC#D1")),
            Step::Stop
        );
    }

    #[test]
    fn scan_skips_sub_entities() {
        let q = Query::scan("DEVICE#", "META");
        assert_eq!(q.step(&ItemKey::new("DEVICE#D1", "META")), Step::Take);
        assert_eq!(q.step(&ItemKey::new("DEVICE#D1", "CONFIG#1")), Step::Skip);
        assert_eq!(q.step(&ItemKey::new("INSTALL#I1", "META")), Step::Stop);
    }

    #[test]
    fn scan_all_takes_every_sort_key() {
        let q = Query::scan_all("STATE#");
        assert_eq!(q.step(&ItemKey::new("STATE#TS", "STATE#TS")), Step::Take);
        assert_eq!(q.step(&ItemKey::new("SURVEY#1", "META")), Step::Stop);
    }

    #[test]
    fn foreign_cursor_yields_empty_range() {
        let q = Query::partition("DEVICE#D2");
        assert!(q.bounds(Some(&ItemKey::new("DEVICE#D1", "META"))).is_none());
    }

    #[test]
    fn descending_scan_is_rejected() {
        assert!(Query::scan("DEVICE#", "META").descending().bounds(None).is_none());
    }
}
