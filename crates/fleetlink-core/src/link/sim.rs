//! SIM ↔ Device links (one-to-one) and SIM status transitions.
//!
//! Both sides carry the link: `DEVICE#{d}/SIM_ASSOC#{s}` plus the
//! `LinkedSIM` attribute on the device META, and `linkedDeviceId` on the
//! SIM META. Every change appends to the SIM's `changeHistory`.

use super::{LinkManager, LinkView, check_id, view_of};
use crate::keys::{self, EntityKind, SubKey, prefix};
use crate::primitives::SIM_ACTIVE;
use crate::store::{Patch, Precondition, StoreError, TransactOp};
use crate::{Actor, FleetError, Item};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Device META attribute holding the link summary.
pub const LINKED_SIM: &str = "LinkedSIM";
/// SIM META attribute holding the linked device id.
pub const LINKED_DEVICE: &str = "linkedDeviceId";
/// SIM META list of link and status events.
pub const CHANGE_HISTORY: &str = "changeHistory";
/// SIM META status attribute.
pub const SIM_STATUS: &str = "status";

/// One element of a SIM's `changeHistory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimHistoryEntry {
    pub timestamp: String,
    /// `linked`, `unlinked` or `status_changed`.
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub performed_by: String,
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_status: Option<String>,
}

impl SimHistoryEntry {
    fn new(timestamp: &str, action: &str, device_id: Option<&str>, actor: &Actor) -> Self {
        Self {
            timestamp: timestamp.to_string(),
            action: action.to_string(),
            device_id: device_id.map(str::to_string),
            performed_by: actor.performed_by.clone(),
            ip_address: actor.ip_address.clone(),
            previous_status: None,
            new_status: None,
        }
    }

    fn to_value(&self) -> Result<Value, FleetError> {
        serde_json::to_value(self).map_err(|e| FleetError::Serialization(e.to_string()))
    }
}

/// Result of a link or unlink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimLink {
    pub device_id: String,
    pub sim_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlinked_date: Option<String>,
}

/// SIM id recorded in a device META's `LinkedSIM`, if any.
#[must_use]
pub fn linked_sim_id(device: &Item) -> Option<&str> {
    device
        .get(LINKED_SIM)
        .and_then(|v| v.get("simId"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Device id recorded in a SIM META's `linkedDeviceId`, if any.
#[must_use]
pub fn linked_device_id(sim: &Item) -> Option<&str> {
    sim.get_str(LINKED_DEVICE).filter(|d| !d.is_empty())
}

/// Allowed SIM status moves: `inactive ↔ active ↔ suspended`.
#[must_use]
pub fn transition_allowed(from: &str, to: &str) -> bool {
    matches!(
        (from, to),
        ("inactive", "active")
            | ("active", "inactive")
            | ("active", "suspended")
            | ("suspended", "active")
    )
}

fn sim_details(sim: &Item) -> Value {
    let details: Map<String, Value> = ["iccid", "msisdn", "provider", "plan"]
        .into_iter()
        .filter_map(|k| sim.get(k).map(|v| (k.to_string(), v.clone())))
        .collect();
    Value::Object(details)
}

impl LinkManager {
    /// Link `sim_id` to `device_id`.
    pub fn link_sim(
        &self,
        device_id: &str,
        sim_id: &str,
        actor: &Actor,
    ) -> Result<SimLink, FleetError> {
        check_id("deviceId", device_id)?;
        check_id("simId", sim_id)?;

        let device_key = keys::meta_key(EntityKind::Device, device_id);
        let sim_key = keys::meta_key(EntityKind::Sim, sim_id);
        let found = self
            .store()
            .batch_get(&[device_key.clone(), sim_key.clone()])?;
        let device = found
            .get(&device_key)
            .ok_or_else(|| FleetError::not_found("Device", device_id))?;
        let sim = found
            .get(&sim_key)
            .ok_or_else(|| FleetError::not_found("SIM", sim_id))?;

        if let Some(current) = linked_sim_id(device) {
            return Err(FleetError::precondition(format!(
                "Device {} already has a linked SIM: {}. Please unlink first.",
                device_id, current
            )));
        }
        if let Some(other) = linked_device_id(sim) {
            return Err(FleetError::conflict(format!(
                "SIM {} is already linked to device {}",
                sim_id, other
            )));
        }
        let status = sim.get_str(SIM_STATUS).unwrap_or("unknown");
        if status != SIM_ACTIVE {
            return Err(FleetError::precondition(format!(
                "SIM {} is not active (status: {})",
                sim_id, status
            )));
        }

        let now = self.now_iso();
        let assoc_key = keys::child_key(
            EntityKind::Device,
            device_id,
            &SubKey::SimAssoc {
                sim_id: sim_id.to_string(),
            },
        );
        let mut assoc = Item::new(&assoc_key, "SIM_ASSOC");
        assoc.set("DeviceId", json!(device_id));
        assoc.set("SimId", json!(sim_id));
        assoc.set("LinkedDate", json!(now));
        assoc.set("LinkedBy", json!(actor.performed_by));
        assoc.set("LinkStatus", json!("active"));

        let entry = SimHistoryEntry::new(&now, "linked", Some(device_id), actor).to_value()?;
        let ops = vec![
            TransactOp::put(assoc, Precondition::MustNotExist),
            TransactOp::update(
                device_key,
                Patch::new()
                    .set(
                        LINKED_SIM,
                        json!({
                            "simId": sim_id,
                            "linkedDate": now,
                            "linkStatus": "active",
                            "simDetails": sim_details(sim),
                        }),
                    )
                    .set("UpdatedDate", now.clone()),
                Precondition::All(vec![
                    Precondition::MustExist,
                    Precondition::attr_empty(LINKED_SIM),
                ]),
            ),
            TransactOp::update(
                sim_key,
                Patch::new()
                    .set(LINKED_DEVICE, device_id)
                    .set("updatedDate", now.clone())
                    .append(CHANGE_HISTORY, entry),
                Precondition::All(vec![
                    Precondition::MustExist,
                    Precondition::attr_empty(LINKED_DEVICE),
                    Precondition::attr_equals(SIM_STATUS, SIM_ACTIVE),
                ]),
            ),
        ];

        match self.store().transact(ops) {
            Ok(()) => {}
            Err(err @ StoreError::TransactionCanceled { .. }) => {
                let failed = err.failed_ops();
                tracing::warn!(device_id, sim_id, ?failed, "SIM link transaction cancelled");
                return Err(if failed.iter().all(|i| *i == 2) {
                    FleetError::conflict(format!(
                        "SIM {} is no longer available for linking",
                        sim_id
                    ))
                } else {
                    FleetError::conflict(format!(
                        "Device {} already has a linked SIM",
                        device_id
                    ))
                });
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(device_id, sim_id, by = %actor.performed_by, "SIM linked");
        Ok(SimLink {
            device_id: device_id.to_string(),
            sim_id: sim_id.to_string(),
            linked_date: Some(now),
            unlinked_date: None,
        })
    }

    /// Remove the SIM link of `device_id`.
    pub fn unlink_sim(&self, device_id: &str, actor: &Actor) -> Result<SimLink, FleetError> {
        check_id("deviceId", device_id)?;

        let device_key = keys::meta_key(EntityKind::Device, device_id);
        if self.store().get(&device_key)?.is_none() {
            return Err(FleetError::not_found("Device", device_id));
        }
        let assoc = self
            .store()
            .first_with_prefix(&device_key.pk, prefix::SIM_ASSOC)?
            .ok_or_else(|| FleetError::NotFound(format!("No SIM linked to device {}", device_id)))?;
        let assoc_key = assoc
            .key()
            .ok_or_else(|| FleetError::Serialization("SIM association without key".into()))?;
        let Some(SubKey::SimAssoc { sim_id }) = SubKey::parse(&assoc_key.sk) else {
            return Err(FleetError::Serialization(format!(
                "malformed SIM association key {}",
                assoc_key
            )));
        };

        let now = self.now_iso();
        let entry = SimHistoryEntry::new(&now, "unlinked", Some(device_id), actor).to_value()?;
        let ops = vec![
            TransactOp::delete(assoc_key, Precondition::MustExist),
            TransactOp::update(
                device_key,
                Patch::new()
                    .remove(LINKED_SIM)
                    .set("UpdatedDate", now.clone()),
                Precondition::MustExist,
            ),
            TransactOp::update(
                keys::meta_key(EntityKind::Sim, &sim_id),
                Patch::new()
                    .remove(LINKED_DEVICE)
                    .set("updatedDate", now.clone())
                    .append(CHANGE_HISTORY, entry),
                Precondition::attr_equals(LINKED_DEVICE, device_id),
            ),
        ];

        match self.store().transact(ops) {
            Ok(()) => {}
            Err(err @ StoreError::TransactionCanceled { .. }) => {
                tracing::warn!(device_id, sim_id = %sim_id, failed = ?err.failed_ops(), "SIM unlink transaction cancelled");
                return Err(FleetError::conflict(format!(
                    "SIM link of device {} changed concurrently; retry",
                    device_id
                )));
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(device_id, sim_id = %sim_id, by = %actor.performed_by, "SIM unlinked");
        Ok(SimLink {
            device_id: device_id.to_string(),
            sim_id,
            linked_date: None,
            unlinked_date: Some(now),
        })
    }

    /// The device's SIM association joined with the SIM record.
    ///
    /// `Ok(None)` when the device has no SIM.
    pub fn get_sim_for_device(&self, device_id: &str) -> Result<Option<LinkView>, FleetError> {
        check_id("deviceId", device_id)?;
        let device_key = keys::meta_key(EntityKind::Device, device_id);
        if self.store().get(&device_key)?.is_none() {
            return Err(FleetError::not_found("Device", device_id));
        }
        let Some(assoc) = self
            .store()
            .first_with_prefix(&device_key.pk, prefix::SIM_ASSOC)?
        else {
            return Ok(None);
        };
        let sim = match assoc.get_str("SimId") {
            Some(sim_id) => self.store().get(&keys::meta_key(EntityKind::Sim, sim_id))?,
            None => None,
        };
        Ok(Some(LinkView {
            association: assoc.view(),
            target: view_of(sim.as_ref()),
        }))
    }

    /// Patch a SIM's attributes, applying a status transition when
    /// `fields` carries a new `status`.
    ///
    /// Leaving `active` while linked is refused; the write is conditional on
    /// the status the decision was based on.
    pub fn update_sim(
        &self,
        sim_id: &str,
        fields: Map<String, Value>,
        actor: &Actor,
    ) -> Result<Item, FleetError> {
        check_id("simId", sim_id)?;
        let key = keys::meta_key(EntityKind::Sim, sim_id);
        let current = self
            .store()
            .get(&key)?
            .ok_or_else(|| FleetError::not_found("SIM", sim_id))?;
        let current_status = current.get_str(SIM_STATUS).unwrap_or("inactive").to_string();

        let now = self.now_iso();
        let next_status = fields
            .get(SIM_STATUS)
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut patch = Patch::new().set_all(fields).set("updatedDate", now.clone());
        let mut conditions = vec![Precondition::MustExist];

        if let Some(next) = next_status.filter(|n| *n != current_status) {
            if !transition_allowed(&current_status, &next) {
                return Err(FleetError::precondition(format!(
                    "Invalid SIM status transition from {} to {}",
                    current_status, next
                )));
            }
            if current_status == SIM_ACTIVE {
                if let Some(device) = linked_device_id(&current) {
                    return Err(FleetError::precondition(format!(
                        "SIM {} is linked to device {}. Please unlink first.",
                        sim_id, device
                    )));
                }
                conditions.push(Precondition::attr_empty(LINKED_DEVICE));
            }
            conditions.push(Precondition::attr_equals(SIM_STATUS, current_status.clone()));

            let mut entry = SimHistoryEntry::new(&now, "status_changed", None, actor);
            entry.previous_status = Some(current_status.clone());
            entry.new_status = Some(next.clone());
            patch = patch.append(CHANGE_HISTORY, entry.to_value()?);
            tracing::info!(sim_id, from = %current_status, to = %next, "SIM status changed");
        }

        self.store()
            .update(&key, &patch, Precondition::All(conditions))
            .map_err(|err| match err {
                StoreError::PreconditionFailed { .. } => FleetError::conflict(format!(
                    "SIM {} changed concurrently; retry",
                    sim_id
                )),
                other => other.into(),
            })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ItemStore, MemoryStore};
    use crate::SystemClock;
    use std::sync::Arc;

    fn manager() -> (LinkManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let lm = LinkManager::new(store.clone(), store.clone(), Arc::new(SystemClock::new()));
        (lm, store)
    }

    fn seed_sim(store: &MemoryStore, id: &str, status: &str) {
        let mut sim = Item::new(&keys::meta_key(EntityKind::Sim, id), "SIM");
        sim.set("simId", json!(id));
        sim.set("status", json!(status));
        sim.set("iccid", json!("8991000000000000001"));
        store.put(sim, Precondition::MustNotExist).expect("seed sim");
    }

    fn seed_device(store: &MemoryStore, id: &str) {
        let mut device = Item::new(&keys::meta_key(EntityKind::Device, id), "DEVICE");
        device.set("DeviceId", json!(id));
        store.put(device, Precondition::MustNotExist).expect("seed device");
    }

    #[test]
    fn transitions() {
        assert!(transition_allowed("inactive", "active"));
        assert!(transition_allowed("suspended", "active"));
        assert!(!transition_allowed("inactive", "suspended"));
    }

    #[test]
    fn link_writes_both_sides() {
        let (lm, store) = manager();
        seed_sim(&store, "SIM001", "active");
        seed_device(&store, "DEV001");

        lm.link_sim("DEV001", "SIM001", &Actor::system()).expect("link");

        let device = store
            .get(&keys::meta_key(EntityKind::Device, "DEV001"))
            .expect("get")
            .expect("device");
        assert_eq!(linked_sim_id(&device), Some("SIM001"));
        let sim = store
            .get(&keys::meta_key(EntityKind::Sim, "SIM001"))
            .expect("get")
            .expect("sim");
        assert_eq!(linked_device_id(&sim), Some("DEV001"));
        assert_eq!(
            sim.get(CHANGE_HISTORY)
                .and_then(Value::as_array)
                .map(Vec::len),
            Some(1)
        );
    }

    #[test]
    fn inactive_sim_cannot_be_linked() {
        let (lm, store) = manager();
        seed_sim(&store, "SIM001", "inactive");
        seed_device(&store, "DEV001");
        let err = lm
            .link_sim("DEV001", "SIM001", &Actor::system())
            .expect_err("inactive");
        assert_eq!(err.to_string(), "SIM SIM001 is not active (status: inactive)");
    }

    #[test]
    fn linked_sim_cannot_leave_active() {
        let (lm, store) = manager();
        seed_sim(&store, "SIM001", "active");
        seed_device(&store, "DEV001");
        lm.link_sim("DEV001", "SIM001", &Actor::system()).expect("link");

        let mut fields = Map::new();
        fields.insert("status".into(), json!("suspended"));
        let err = lm
            .update_sim("SIM001", fields.clone(), &Actor::system())
            .expect_err("linked");
        assert!(matches!(err, FleetError::Precondition(_)));

        lm.unlink_sim("DEV001", &Actor::system()).expect("unlink");
        let sim = lm
            .update_sim("SIM001", fields, &Actor::system())
            .expect("suspend");
        assert_eq!(sim.get_str("status"), Some("suspended"));
        assert_eq!(
            sim.get(CHANGE_HISTORY)
                .and_then(Value::as_array)
                .map(Vec::len),
            Some(3)
        );
    }

    #[test]
    fn unlink_without_link_is_not_found() {
        let (lm, store) = manager();
        seed_device(&store, "DEV001");
        assert!(matches!(
            lm.unlink_sim("DEV001", &Actor::system()),
            Err(FleetError::NotFound(_))
        ));
    }
}
