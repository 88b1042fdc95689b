//! Device aggregate: META plus configs, repairs, runtime events and the
//! device-side halves of SIM and install links.

use super::{
    Context, ListOptions, cascade_delete, default_attr, list_aggregates, list_children,
    take_or_generate_id,
};
use crate::keys::{self, EntityKind, SubKey, prefix};
use crate::link::LinkManager;
use crate::link::install::LINKED_INSTALL;
use crate::link::sim::{LINKED_SIM, linked_sim_id};
use crate::primitives::META_SK;
use crate::store::{Precondition, StoreError, TransactOp};
use crate::validate::{Mode, schemas};
use crate::{FleetError, Item, ItemKey, ListPage};
use serde::Serialize;
use serde_json::{Value, json};

/// A device sub-entity, dispatched on its sort-key prefix.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "record", rename_all = "lowercase")]
pub enum DeviceChild {
    Config(Value),
    Repair(Value),
    Install(Value),
    Sim(Value),
    Runtime(Value),
}

impl DeviceChild {
    /// Classify an item stored under a device partition. `None` for the
    /// META record and for unknown shapes.
    #[must_use]
    pub fn from_item(item: &Item) -> Option<Self> {
        let view = item.view();
        match SubKey::parse(item.sk()?)? {
            SubKey::Config { .. } => Some(Self::Config(view)),
            SubKey::Repair { .. } => Some(Self::Repair(view)),
            SubKey::InstallAssoc { .. } => Some(Self::Install(view)),
            SubKey::SimAssoc { .. } => Some(Self::Sim(view)),
            SubKey::Runtime { .. } => Some(Self::Runtime(view)),
            _ => None,
        }
    }
}

/// Orchestrates device operations.
#[derive(Debug, Clone)]
pub struct DeviceService {
    ctx: Context,
    links: LinkManager,
}

impl DeviceService {
    pub(crate) fn new(ctx: Context, links: LinkManager) -> Self {
        Self { ctx, links }
    }

    fn meta(id: &str) -> ItemKey {
        keys::meta_key(EntityKind::Device, id)
    }

    fn require_device(&self, id: &str) -> Result<Item, FleetError> {
        crate::link::check_id("deviceId", id)?;
        self.ctx.require(&Self::meta(id), "Device", id)
    }

    /// Put a sub-entity under an existing device, atomically with a check
    /// that the device META exists.
    fn put_child(&self, device_id: &str, child: Item, what: &str) -> Result<Item, FleetError> {
        let ops = vec![
            TransactOp::put(child.clone(), Precondition::MustNotExist),
            TransactOp::check(Self::meta(device_id), Precondition::MustExist),
        ];
        match self.ctx.store().transact(ops) {
            Ok(()) => Ok(child),
            Err(err @ StoreError::TransactionCanceled { .. }) => {
                if err.failed_ops().contains(&1) {
                    Err(FleetError::not_found("Device", device_id))
                } else {
                    Err(FleetError::conflict(format!(
                        "{} already exists for device {}",
                        what, device_id
                    )))
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    // -------------------------------------------------------------------------
    // META
    // -------------------------------------------------------------------------

    /// Create a device. `DeviceId` is generated when absent.
    pub fn create(&self, body: &Value) -> Result<Item, FleetError> {
        let mut fields = schemas::DEVICE
            .validate(body, Mode::Create)
            .map_err(FleetError::Validation)?;
        let id = take_or_generate_id(&mut fields, "DeviceId");
        default_attr(&mut fields, "Status", "active");
        let now = self.ctx.now();
        fields.insert("CreatedDate".into(), json!(now));
        fields.insert("UpdatedDate".into(), json!(now));
        self.ctx
            .create_meta(EntityKind::Device, &Self::meta(&id), &id, fields)
    }

    /// Device META; with `include_links`, joined with its SIM and install.
    pub fn get(&self, id: &str, include_links: bool) -> Result<Value, FleetError> {
        let device = self.require_device(id)?;
        let mut view = device.view();
        if include_links {
            let sim = self.links.get_sim_for_device(id)?;
            let install = self.links.get_install_for_device(id)?;
            if let Value::Object(map) = &mut view {
                map.insert("Sim".into(), json!(sim.and_then(|l| l.target)));
                map.insert("Install".into(), json!(install.and_then(|l| l.target)));
            }
        }
        Ok(view)
    }

    /// Patch device attributes.
    pub fn update(&self, id: &str, body: &Value) -> Result<Item, FleetError> {
        crate::link::check_id("deviceId", id)?;
        let fields = schemas::DEVICE
            .validate(body, Mode::Update)
            .map_err(FleetError::Validation)?;
        self.ctx
            .patch_existing(&Self::meta(id), "Device", id, fields, "UpdatedDate")
    }

    /// Delete a device and every sub-entity.
    ///
    /// Refused while a SIM or an install is linked; the condition is part
    /// of every cascade chunk and of the final META delete.
    pub fn delete(&self, id: &str) -> Result<usize, FleetError> {
        let device = self.require_device(id)?;
        if let Some(err) = Self::linked_refusal(id, &device) {
            return Err(err);
        }
        let guard = Precondition::All(vec![
            Precondition::MustExist,
            Precondition::attr_empty(LINKED_SIM),
            Precondition::attr_empty(LINKED_INSTALL),
        ]);
        match cascade_delete(self.ctx.store(), &Self::meta(id), guard) {
            Ok(children) => Ok(children),
            Err(Some(err)) => Err(err),
            Err(None) => match self.ctx.store().get(&Self::meta(id))? {
                None => Err(FleetError::not_found("Device", id)),
                Some(device) => Err(Self::linked_refusal(id, &device).unwrap_or_else(|| {
                    FleetError::conflict(format!("Device {} changed during delete; retry", id))
                })),
            },
        }
    }

    fn linked_refusal(id: &str, device: &Item) -> Option<FleetError> {
        if let Some(sim) = linked_sim_id(device) {
            return Some(FleetError::precondition(format!(
                "Device {} has a linked SIM: {}. Please unlink first.",
                id, sim
            )));
        }
        device
            .get_str(LINKED_INSTALL)
            .filter(|i| !i.is_empty())
            .map(|install| {
                FleetError::precondition(format!(
                    "Device {} is linked to install {}. Please unlink first.",
                    id, install
                ))
            })
    }

    /// Page through devices.
    pub fn list(&self, opts: &ListOptions) -> Result<ListPage<Value>, FleetError> {
        list_aggregates(self.ctx.store(), EntityKind::Device, META_SK, opts)
    }

    /// Every sub-entity of a device, classified.
    pub fn children(&self, id: &str, opts: &ListOptions) -> Result<ListPage<DeviceChild>, FleetError> {
        self.require_device(id)?;
        let page = self.ctx.store().query(
            &keys::pk(EntityKind::Device, id),
            None,
            opts.page_limit()?,
            opts.next_token.as_deref(),
        )?;
        Ok(ListPage::new(
            page.items.iter().filter_map(DeviceChild::from_item).collect(),
            page.next,
        ))
    }

    // -------------------------------------------------------------------------
    // CONFIGS
    // -------------------------------------------------------------------------

    /// Record a configuration version. `CreatedDate` completes the key.
    pub fn add_config(&self, id: &str, body: &Value) -> Result<Item, FleetError> {
        crate::link::check_id("deviceId", id)?;
        let fields = schemas::CONFIG
            .validate(body, Mode::Create)
            .map_err(FleetError::Validation)?;
        let version = fields
            .get("ConfigVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let created = self.ctx.now();
        let key = keys::child_key(
            EntityKind::Device,
            id,
            &SubKey::Config {
                version: version.clone(),
                created: created.clone(),
            },
        );
        let mut item = Item::new(&key, "CONFIG");
        for (name, value) in fields {
            item.set(&name, value);
        }
        item.set("DeviceId", json!(id));
        item.set("CreatedDate", json!(created));
        self.put_child(id, item, &format!("Config {}", version))
    }

    /// Page through configs, oldest version key first.
    pub fn list_configs(&self, id: &str, opts: &ListOptions) -> Result<ListPage<Value>, FleetError> {
        self.require_device(id)?;
        list_children(
            self.ctx.store(),
            &keys::pk(EntityKind::Device, id),
            prefix::CONFIG,
            opts,
        )
    }

    /// Delete one config; the caller supplies the full sub-key.
    pub fn delete_config(&self, id: &str, version: &str, created: &str) -> Result<(), FleetError> {
        crate::link::check_id("deviceId", id)?;
        crate::link::check_id("ConfigVersion", version)?;
        crate::link::check_id("CreatedDate", created)?;
        let key = keys::child_key(
            EntityKind::Device,
            id,
            &SubKey::Config {
                version: version.to_string(),
                created: created.to_string(),
            },
        );
        match self.ctx.store().delete(&key, Precondition::MustExist) {
            Ok(_) => Ok(()),
            Err(StoreError::PreconditionFailed { .. }) => Err(FleetError::NotFound(format!(
                "Config {} ({}) not found for device {}",
                version, created, id
            ))),
            Err(err) => Err(err.into()),
        }
    }

    // -------------------------------------------------------------------------
    // REPAIRS
    // -------------------------------------------------------------------------

    /// Record a repair. `RepairId` is generated when absent.
    pub fn add_repair(&self, id: &str, body: &Value) -> Result<Item, FleetError> {
        crate::link::check_id("deviceId", id)?;
        let mut fields = schemas::REPAIR
            .validate(body, Mode::Create)
            .map_err(FleetError::Validation)?;
        let repair_id = take_or_generate_id(&mut fields, "RepairId");
        default_attr(&mut fields, "Status", "pending");
        let date = fields
            .get("RepairDate")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let key = keys::child_key(
            EntityKind::Device,
            id,
            &SubKey::Repair {
                repair_id: repair_id.clone(),
                date,
            },
        );
        let mut item = Item::new(&key, "REPAIR");
        for (name, value) in fields {
            item.set(&name, value);
        }
        item.set("DeviceId", json!(id));
        item.set("CreatedDate", json!(self.ctx.now()));
        self.put_child(id, item, &format!("Repair {}", repair_id))
    }

    /// Page through repairs.
    pub fn list_repairs(&self, id: &str, opts: &ListOptions) -> Result<ListPage<Value>, FleetError> {
        self.require_device(id)?;
        list_children(
            self.ctx.store(),
            &keys::pk(EntityKind::Device, id),
            prefix::REPAIR,
            opts,
        )
    }

    /// Patch a repair located by its id.
    pub fn update_repair(&self, id: &str, repair_id: &str, body: &Value) -> Result<Item, FleetError> {
        crate::link::check_id("deviceId", id)?;
        crate::link::check_id("repairId", repair_id)?;
        let fields = schemas::REPAIR
            .validate(body, Mode::Update)
            .map_err(FleetError::Validation)?;
        let existing = self
            .ctx
            .store()
            .first_with_prefix(
                &keys::pk(EntityKind::Device, id),
                &format!("{}{}#", prefix::REPAIR, repair_id),
            )?
            .ok_or_else(|| {
                FleetError::NotFound(format!("Repair {} not found for device {}", repair_id, id))
            })?;
        let key = existing
            .key()
            .ok_or_else(|| FleetError::Serialization("repair without key".into()))?;
        self.ctx
            .patch_existing(&key, "Repair", repair_id, fields, "UpdatedDate")
    }

    // -------------------------------------------------------------------------
    // RUNTIME
    // -------------------------------------------------------------------------

    /// Record a runtime event keyed by its `EventDate`.
    pub fn record_runtime(&self, id: &str, body: &Value) -> Result<Item, FleetError> {
        crate::link::check_id("deviceId", id)?;
        let fields = schemas::RUNTIME
            .validate(body, Mode::Create)
            .map_err(FleetError::Validation)?;
        let event_date = fields
            .get("EventDate")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let key = keys::child_key(
            EntityKind::Device,
            id,
            &SubKey::Runtime {
                event_date: event_date.clone(),
            },
        );
        let mut item = Item::new(&key, "RUNTIME");
        for (name, value) in fields {
            item.set(&name, value);
        }
        item.set("DeviceId", json!(id));
        self.put_child(id, item, &format!("Runtime event at {}", event_date))
    }

    /// Page through runtime events, newest first.
    pub fn list_runtime(&self, id: &str, opts: &ListOptions) -> Result<ListPage<Value>, FleetError> {
        self.require_device(id)?;
        let page = self.ctx.store().fetch(
            &crate::query::Query::partition(keys::pk(EntityKind::Device, id))
                .with_prefix(prefix::RUNTIME)
                .limit(opts.page_limit()?)
                .after(opts.next_token.clone())
                .descending(),
        )?;
        Ok(ListPage::new(
            page.items.iter().map(Item::view).collect(),
            page.next,
        ))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Services;
    use crate::store::MemoryStore;
    use crate::{Actor, SystemClock};
    use std::sync::Arc;

    fn services() -> Services {
        let store = Arc::new(MemoryStore::new());
        Services::new(store.clone(), store, Arc::new(SystemClock::new()))
    }

    fn device(id: &str) -> Value {
        json!({"DeviceId": id, "DeviceName": "Chlorinator", "DeviceType": "chlorine"})
    }

    #[test]
    fn duplicate_create_conflicts() {
        let svc = services();
        svc.devices.create(&device("DEV001")).expect("create");
        let err = svc.devices.create(&device("DEV001")).expect_err("duplicate");
        assert_eq!(err.to_string(), "DEVICE with ID DEV001 already exists");
    }

    #[test]
    fn children_dispatch_on_prefix() {
        let svc = services();
        svc.devices.create(&device("DEV001")).expect("create");
        svc.devices
            .add_config("DEV001", &json!({"ConfigVersion": "v1", "Settings": {"dose": 2}}))
            .expect("config");
        svc.devices
            .add_repair("DEV001", &json!({"RepairDate": "2024-04-01", "Description": "seal"}))
            .expect("repair");

        let page = svc
            .devices
            .children("DEV001", &ListOptions::new())
            .expect("children");
        assert_eq!(page.items.len(), 2);
        assert!(matches!(page.items[0], DeviceChild::Config(_)));
        assert!(matches!(page.items[1], DeviceChild::Repair(_)));
    }

    #[test]
    fn config_delete_needs_full_key() {
        let svc = services();
        svc.devices.create(&device("DEV001")).expect("create");
        let config = svc
            .devices
            .add_config("DEV001", &json!({"ConfigVersion": "v1", "Settings": {}}))
            .expect("config");
        let created = config.get_str("CreatedDate").expect("created").to_string();

        assert!(matches!(
            svc.devices.delete_config("DEV001", "v1", "2000-01-01T00:00:00Z"),
            Err(FleetError::NotFound(_))
        ));
        svc.devices
            .delete_config("DEV001", "v1", &created)
            .expect("delete");
    }

    #[test]
    fn linked_device_cannot_be_deleted() {
        let svc = services();
        svc.devices.create(&device("DEV001")).expect("create");
        svc.sims
            .create(&json!({"simId": "SIM001", "iccid": "899100000000000001", "provider": "Airtel", "status": "active"}))
            .expect("sim");
        svc.links
            .link_sim("DEV001", "SIM001", &Actor::system())
            .expect("link");

        let err = svc.devices.delete("DEV001").expect_err("linked");
        assert!(matches!(err, FleetError::Precondition(_)));

        svc.links.unlink_sim("DEV001", &Actor::system()).expect("unlink");
        svc.devices.delete("DEV001").expect("delete");
        assert!(matches!(
            svc.devices.get("DEV001", false),
            Err(FleetError::NotFound(_))
        ));
    }

    #[test]
    fn config_for_missing_device_is_not_found() {
        let svc = services();
        assert!(matches!(
            svc.devices
                .add_config("NOPE", &json!({"ConfigVersion": "v1", "Settings": {}})),
            Err(FleetError::NotFound(_))
        ));
    }
}
