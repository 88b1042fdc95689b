//! Install ↔ Device links (one install per device, many devices per
//! install) and the install's device history.
//!
//! A link is `INSTALL#{I}/DEVICE_ASSOC#{d}` plus `DEVICE#{d}/INSTALL_ASSOC#{I}`
//! plus `LinkedInstallId` on the device META. The META attribute is what
//! makes "at most one install per device" hold under concurrency: both
//! association keys differ between two installs, the META condition does
//! not. Each link and unlink also moves `LinkedDeviceCount` on the install
//! META, which install delete requires to be zero.

use super::{
    LinkDirection, LinkManager, LinkReport, LinkView, actor_attrs, check_id,
    normalize_device_ids, view_of,
};
use crate::keys::{self, EntityKind, SubKey, prefix};
use crate::query::Query;
use crate::store::{Patch, Precondition, StoreError, TransactOp};
use crate::{Actor, FleetError, Item, ItemKey, ListPage};
use serde_json::{Map, Value, json};

/// Device META attribute naming the linked install.
pub const LINKED_INSTALL: &str = "LinkedInstallId";

/// Install META counter of linked devices. Every link and unlink
/// transaction writes it, so install delete can be conditioned on zero.
pub const LINKED_DEVICE_COUNT: &str = "LinkedDeviceCount";

/// Key order of a history listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryOrder {
    Asc,
    #[default]
    Desc,
}

impl HistoryOrder {
    /// Parse `asc` / `desc`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
}

impl LinkManager {
    fn require_install(&self, install_id: &str) -> Result<Item, FleetError> {
        check_id("installId", install_id)?;
        self.store()
            .get(&keys::meta_key(EntityKind::Install, install_id))?
            .ok_or_else(|| FleetError::not_found("Install", install_id))
    }

    fn history_item(
        &self,
        install_id: &str,
        device_id: &str,
        action: &str,
        reason: Option<&str>,
        actor: &Actor,
    ) -> Item {
        let now = self.now_iso();
        let key = keys::child_key(
            EntityKind::Install,
            install_id,
            &SubKey::DeviceHistory {
                timestamp: now.clone(),
                device_id: device_id.to_string(),
            },
        );
        let mut attrs = Map::new();
        attrs.insert("Action".into(), json!(action));
        attrs.insert("InstallId".into(), json!(install_id));
        attrs.insert("DeviceId".into(), json!(device_id));
        attrs.insert("Timestamp".into(), json!(now));
        if let Some(reason) = reason {
            attrs.insert("Reason".into(), json!(reason));
        }
        actor_attrs(actor, &mut attrs);

        let mut item = Item::new(&key, "DEVICE_HISTORY");
        for (name, value) in attrs {
            item.set(&name, value);
        }
        item
    }

    /// Link each device to `install_id`; one transaction per device.
    ///
    /// Missing or already-linked devices are reported in `errors` and do
    /// not affect the others.
    pub fn link_devices(
        &self,
        install_id: &str,
        device_ids: &[String],
        reason: Option<&str>,
        actor: &Actor,
    ) -> Result<LinkReport, FleetError> {
        let device_ids = normalize_device_ids(device_ids)?;
        let install = self.require_install(install_id)?;
        let install_name = install.get("InstallName").cloned().unwrap_or(Value::Null);

        let meta_keys: Vec<ItemKey> = device_ids
            .iter()
            .map(|d| keys::meta_key(EntityKind::Device, d))
            .collect();
        let devices = self.store().batch_get(&meta_keys)?;

        let mut report = LinkReport::new(install_id, LinkDirection::Link);
        for (device_id, meta_key) in device_ids.iter().zip(meta_keys) {
            let Some(device) = devices.get(&meta_key) else {
                report.fail(device_id, format!("Device {} not found", device_id));
                continue;
            };
            let existing = self
                .store()
                .first_with_prefix(&meta_key.pk, prefix::INSTALL_ASSOC)?
                .and_then(|a| a.get_str("InstallId").map(str::to_string))
                .or_else(|| device.get_str(LINKED_INSTALL).map(str::to_string))
                .filter(|s| !s.is_empty());
            if let Some(existing) = existing {
                report.fail(device_id, already_linked(device_id, &existing, install_id));
                continue;
            }

            let now = self.now_iso();
            let mut install_side = Item::new(
                &keys::child_key(
                    EntityKind::Install,
                    install_id,
                    &SubKey::DeviceAssoc {
                        device_id: device_id.clone(),
                    },
                ),
                "DEVICE_ASSOC",
            );
            install_side.set("InstallId", json!(install_id));
            install_side.set("DeviceId", json!(device_id));
            install_side.set("LinkedDate", json!(now));
            install_side.set("LinkedBy", json!(actor.performed_by));
            install_side.set("LinkStatus", json!("active"));
            if let Some(reason) = reason {
                install_side.set("Reason", json!(reason));
            }

            let mut device_side = Item::new(
                &keys::child_key(
                    EntityKind::Device,
                    device_id,
                    &SubKey::InstallAssoc {
                        install_id: install_id.to_string(),
                    },
                ),
                "INSTALL_ASSOC",
            );
            device_side.set("InstallId", json!(install_id));
            device_side.set("DeviceId", json!(device_id));
            device_side.set("InstallName", install_name.clone());
            device_side.set("LinkedDate", json!(now));
            device_side.set("LinkedBy", json!(actor.performed_by));

            let history = self.history_item(install_id, device_id, "LINKED", reason, actor);
            let ops = vec![
                TransactOp::update(
                    keys::meta_key(EntityKind::Install, install_id),
                    Patch::new().add(LINKED_DEVICE_COUNT, 1),
                    Precondition::MustExist,
                ),
                TransactOp::put(install_side, Precondition::MustNotExist),
                TransactOp::put(device_side, Precondition::MustNotExist),
                TransactOp::update(
                    meta_key,
                    Patch::new()
                        .set(LINKED_INSTALL, install_id)
                        .set("UpdatedDate", now),
                    Precondition::All(vec![
                        Precondition::MustExist,
                        Precondition::attr_empty(LINKED_INSTALL),
                    ]),
                ),
                TransactOp::put(history, Precondition::MustNotExist),
            ];

            match self.store().transact(ops) {
                Ok(()) => {
                    tracing::info!(install_id, device_id = %device_id, "device linked to install");
                    report.ok(device_id);
                }
                Err(err @ StoreError::TransactionCanceled { .. }) => {
                    let failed = err.failed_ops();
                    tracing::warn!(install_id, device_id = %device_id, failed = ?failed, "device link transaction cancelled");
                    if failed.contains(&0) {
                        report.fail(device_id, format!("Install {} not found", install_id));
                    } else {
                        report.fail(
                            device_id,
                            format!("Device {} is already linked to an install", device_id),
                        );
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(report)
    }

    /// Remove each device's link to `install_id`; one transaction per device.
    pub fn unlink_devices(
        &self,
        install_id: &str,
        device_ids: &[String],
        reason: Option<&str>,
        actor: &Actor,
    ) -> Result<LinkReport, FleetError> {
        let device_ids = normalize_device_ids(device_ids)?;
        self.require_install(install_id)?;

        let meta_keys: Vec<ItemKey> = device_ids
            .iter()
            .map(|d| keys::meta_key(EntityKind::Device, d))
            .collect();
        let devices = self.store().batch_get(&meta_keys)?;

        let pairs: Vec<(ItemKey, ItemKey)> = device_ids
            .iter()
            .map(|d| {
                (
                    keys::child_key(
                        EntityKind::Install,
                        install_id,
                        &SubKey::DeviceAssoc {
                            device_id: d.clone(),
                        },
                    ),
                    keys::child_key(
                        EntityKind::Device,
                        d,
                        &SubKey::InstallAssoc {
                            install_id: install_id.to_string(),
                        },
                    ),
                )
            })
            .collect();
        let assoc_keys: Vec<ItemKey> = pairs
            .iter()
            .flat_map(|(a, b)| [a.clone(), b.clone()])
            .collect();
        let assocs = self.store().batch_get(&assoc_keys)?;

        let mut report = LinkReport::new(install_id, LinkDirection::Unlink);
        for ((device_id, meta_key), (install_side, device_side)) in
            device_ids.iter().zip(meta_keys).zip(pairs)
        {
            if !devices.contains_key(&meta_key) {
                report.fail(device_id, format!("Device {} not found", device_id));
                continue;
            }
            if !assocs.contains_key(&install_side) || !assocs.contains_key(&device_side) {
                report.fail(
                    device_id,
                    format!("Device {} is not linked to install {}", device_id, install_id),
                );
                continue;
            }

            let history = self.history_item(install_id, device_id, "UNLINKED", reason, actor);
            let ops = vec![
                TransactOp::update(
                    keys::meta_key(EntityKind::Install, install_id),
                    Patch::new().add(LINKED_DEVICE_COUNT, -1),
                    Precondition::MustExist,
                ),
                TransactOp::delete(install_side, Precondition::MustExist),
                TransactOp::delete(device_side, Precondition::MustExist),
                TransactOp::update(
                    meta_key,
                    Patch::new()
                        .remove(LINKED_INSTALL)
                        .set("UpdatedDate", self.now_iso()),
                    Precondition::attr_equals(LINKED_INSTALL, install_id),
                ),
                TransactOp::put(history, Precondition::MustNotExist),
            ];

            match self.store().transact(ops) {
                Ok(()) => {
                    tracing::info!(install_id, device_id = %device_id, "device unlinked from install");
                    report.ok(device_id);
                }
                Err(err @ StoreError::TransactionCanceled { .. }) => {
                    tracing::warn!(install_id, device_id = %device_id, failed = ?err.failed_ops(), "device unlink transaction cancelled");
                    report.fail(
                        device_id,
                        format!("Device {} is not linked to install {}", device_id, install_id),
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(report)
    }

    /// Devices linked to an install, enriched with their META.
    pub fn list_devices_for_install(
        &self,
        install_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<ListPage<Value>, FleetError> {
        self.require_install(install_id)?;
        let page = self.store().query(
            &keys::pk(EntityKind::Install, install_id),
            Some(prefix::DEVICE_ASSOC),
            limit,
            cursor,
        )?;

        let meta_keys: Vec<ItemKey> = page
            .items
            .iter()
            .filter_map(|a| a.get_str("DeviceId"))
            .map(|d| keys::meta_key(EntityKind::Device, d))
            .collect();
        let devices = self.store().batch_get(&meta_keys)?;

        let items = page
            .items
            .iter()
            .map(|assoc| {
                let device_id = assoc.get_str("DeviceId").unwrap_or_default();
                let mut view = match devices.get(&keys::meta_key(EntityKind::Device, device_id)) {
                    Some(device) => device.view(),
                    None => json!({ "DeviceId": device_id }),
                };
                if let Value::Object(map) = &mut view {
                    for (from, to) in [
                        ("LinkedDate", "linkedDate"),
                        ("LinkedBy", "linkedBy"),
                        ("LinkStatus", "linkStatus"),
                    ] {
                        map.insert(
                            to.to_string(),
                            assoc.get(from).cloned().unwrap_or(Value::Null),
                        );
                    }
                }
                view
            })
            .collect();
        Ok(ListPage::new(items, page.next))
    }

    /// The install a device is linked to, joined with the install META.
    ///
    /// `Ok(None)` when the device is not linked.
    pub fn get_install_for_device(&self, device_id: &str) -> Result<Option<LinkView>, FleetError> {
        check_id("deviceId", device_id)?;
        let device_key = keys::meta_key(EntityKind::Device, device_id);
        if self.store().get(&device_key)?.is_none() {
            return Err(FleetError::not_found("Device", device_id));
        }
        let Some(assoc) = self
            .store()
            .first_with_prefix(&device_key.pk, prefix::INSTALL_ASSOC)?
        else {
            return Ok(None);
        };
        let install = match assoc.get_str("InstallId") {
            Some(id) => self.store().get(&keys::meta_key(EntityKind::Install, id))?,
            None => None,
        };
        Ok(Some(LinkView {
            association: assoc.view(),
            target: view_of(install.as_ref()),
        }))
    }

    /// Link/unlink history of an install, newest first by default.
    pub fn list_install_history(
        &self,
        install_id: &str,
        order: HistoryOrder,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<ListPage<Value>, FleetError> {
        self.require_install(install_id)?;
        let mut query = Query::partition(keys::pk(EntityKind::Install, install_id))
            .with_prefix(prefix::DEVICE_HISTORY)
            .limit(limit)
            .after(cursor.map(str::to_string));
        if order == HistoryOrder::Desc {
            query = query.descending();
        }
        let page = self.store().fetch(&query)?;
        Ok(ListPage::new(
            page.items.iter().map(Item::view).collect(),
            page.next,
        ))
    }
}

fn already_linked(device_id: &str, existing: &str, install_id: &str) -> String {
    if existing == install_id {
        format!("Device {} is already linked to this install", device_id)
    } else {
        format!(
            "Device {} is already linked to install {}",
            device_id, existing
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
