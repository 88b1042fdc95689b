//! Install region uniqueness: at most one install per
//! (state, district, mandal, village, habitation) tuple.
//!
//! The install META and a `REGION_LOCK#…/LOCK` record are written in one
//! transaction, both with `MustNotExist`. The cancellation reasons tell
//! which of the two lost.

use super::LinkManager;
use crate::keys;
use crate::store::{Precondition, StoreError, TransactOp};
use crate::{FleetError, Item, ItemKey};
use serde_json::json;

/// Attribute names of the region tuple on install and survey records.
pub const REGION_FIELDS: [&str; 5] = [
    "StateId",
    "DistrictId",
    "MandalId",
    "VillageId",
    "HabitationId",
];

/// The ordered quintuple identifying an installation site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionTuple {
    pub state: String,
    pub district: String,
    pub mandal: String,
    pub village: String,
    pub habitation: String,
}

impl RegionTuple {
    /// Read the tuple from a record's `StateId` … `HabitationId`.
    pub fn from_item(item: &Item) -> Result<Self, FleetError> {
        let field = |name: &str| {
            item.get_str(name)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| FleetError::validation(format!("{} is required", name)))
        };
        Ok(Self {
            state: field(REGION_FIELDS[0])?,
            district: field(REGION_FIELDS[1])?,
            mandal: field(REGION_FIELDS[2])?,
            village: field(REGION_FIELDS[3])?,
            habitation: field(REGION_FIELDS[4])?,
        })
    }

    fn parts(&self) -> [&str; 5] {
        [
            self.state.as_str(),
            self.district.as_str(),
            self.mandal.as_str(),
            self.village.as_str(),
            self.habitation.as_str(),
        ]
    }

    /// Key of the lock record for this tuple.
    #[must_use]
    pub fn lock_key(&self) -> ItemKey {
        keys::region_lock_key(&self.parts())
    }
}

impl std::fmt::Display for RegionTuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})", self.parts().join(", "))
    }
}

impl LinkManager {
    /// Write a new install META together with its region lock.
    ///
    /// Fails with `Conflict` when the install id exists, or when the region
    /// is taken, in which case `existing_id` names the winning install.
    pub fn create_install_with_lock(&self, install: Item) -> Result<(), FleetError> {
        let install_id = install.get_str("InstallId").unwrap_or_default().to_string();
        let region = RegionTuple::from_item(&install)?;
        let lock_key = region.lock_key();

        let mut lock = Item::new(&lock_key, "REGION_LOCK");
        lock.set("InstallId", json!(install_id));
        for (name, value) in REGION_FIELDS.iter().zip(region.parts()) {
            lock.set(name, json!(value));
        }
        lock.set("CreatedDate", json!(self.now_iso()));

        let ops = vec![
            TransactOp::put(install, Precondition::MustNotExist),
            TransactOp::put(lock, Precondition::MustNotExist),
        ];
        match self.store().transact(ops) {
            Ok(()) => {
                tracing::info!(install_id = %install_id, region = %region, "install created with region lock");
                Ok(())
            }
            Err(err @ StoreError::TransactionCanceled { .. }) => {
                let failed = err.failed_ops();
                if failed.contains(&0) {
                    return Err(FleetError::already_exists("INSTALL", &install_id));
                }
                let winner = self
                    .store()
                    .get(&lock_key)?
                    .and_then(|l| l.get_str("InstallId").map(str::to_string));
                tracing::warn!(install_id = %install_id, region = %region, winner = ?winner, "region already taken");
                Err(FleetError::Conflict {
                    message: format!(
                        "An installation already exists for region {}",
                        region
                    ),
                    existing_id: winner,
                })
            }
            Err(err) => Err(err.into()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
