//! Install aggregate: META, region lock, and the install side of device
//! and contact links.

use super::{Context, ListOptions, cascade_delete, default_attr, list_aggregates, take_or_generate_id};
use crate::keys::{self, EntityKind};
use crate::link::install::{HistoryOrder, LINKED_DEVICE_COUNT};
use crate::link::{LinkManager, LinkReport, RegionTuple};
use crate::primitives::{DEFAULT_PAGE_SIZE, META_SK};
use crate::store::{Precondition, TransactOp};
use crate::validate::{Mode, schemas};
use crate::{Actor, FleetError, Item, ItemKey, ListPage};
use serde_json::{Value, json};

/// Orchestrates install operations.
#[derive(Debug, Clone)]
pub struct InstallService {
    ctx: Context,
    links: LinkManager,
}

impl InstallService {
    pub(crate) fn new(ctx: Context, links: LinkManager) -> Self {
        Self { ctx, links }
    }

    fn meta(id: &str) -> ItemKey {
        keys::meta_key(EntityKind::Install, id)
    }

    /// Create an install and claim its region.
    pub fn create(&self, body: &Value, actor: &Actor) -> Result<Item, FleetError> {
        let mut fields = schemas::INSTALL
            .validate(body, Mode::Create)
            .map_err(FleetError::Validation)?;
        let id = take_or_generate_id(&mut fields, "InstallId");
        default_attr(&mut fields, "Status", "active");
        let now = self.ctx.now();
        fields.insert("CreatedDate".into(), json!(now));
        fields.insert("UpdatedDate".into(), json!(now));
        fields.insert("CreatedBy".into(), json!(actor.performed_by));
        fields.insert(LINKED_DEVICE_COUNT.into(), json!(0));

        let mut install = Item::new(&Self::meta(&id), EntityKind::Install.tag());
        for (name, value) in fields {
            install.set(&name, value);
        }
        self.links.create_install_with_lock(install.clone())?;
        Ok(install)
    }

    /// Install META, with its linked devices and contacts when asked.
    pub fn get(&self, id: &str, include_links: bool) -> Result<Value, FleetError> {
        crate::link::check_id("installId", id)?;
        let install = self.ctx.require(&Self::meta(id), "Install", id)?;
        let mut view = install.view();
        if include_links {
            let devices = self.links.list_devices_for_install(id, DEFAULT_PAGE_SIZE, None)?;
            let contacts = self.links.list_contacts_for_install(id, DEFAULT_PAGE_SIZE, None)?;
            if let Value::Object(map) = &mut view {
                map.insert("Devices".into(), json!(devices.items));
                map.insert("Contacts".into(), json!(contacts.items));
            }
        }
        Ok(view)
    }

    /// Patch install attributes. The region tuple is immutable.
    pub fn update(&self, id: &str, body: &Value) -> Result<Item, FleetError> {
        crate::link::check_id("installId", id)?;
        let fields = schemas::INSTALL
            .validate(body, Mode::Update)
            .map_err(FleetError::Validation)?;
        self.ctx
            .patch_existing(&Self::meta(id), "Install", id, fields, "UpdatedDate")
    }

    /// Delete an install with no linked devices, releasing its region lock.
    ///
    /// Every cascade chunk and the META delete are conditioned on a zero
    /// `LinkedDeviceCount`, so a link that commits after the emptiness
    /// check cancels the delete instead of surviving it.
    pub fn delete(&self, id: &str) -> Result<usize, FleetError> {
        crate::link::check_id("installId", id)?;
        let install = self.ctx.require(&Self::meta(id), "Install", id)?;
        let has_devices = || {
            FleetError::precondition(format!(
                "Install {} has linked devices. Please unlink them first.",
                id
            ))
        };
        let linked = self.links.list_devices_for_install(id, 1, None)?;
        if !linked.items.is_empty() {
            return Err(has_devices());
        }
        let removed = cascade_delete(
            self.ctx.store(),
            &Self::meta(id),
            Precondition::counter_zero(LINKED_DEVICE_COUNT),
        )
        .map_err(|err| match err {
            Some(err) => err,
            None => match self.ctx.store().get(&Self::meta(id)) {
                Ok(Some(_)) => {
                    tracing::warn!(install_id = id, "install delete cancelled by a concurrent link");
                    has_devices()
                }
                Ok(None) => FleetError::not_found("Install", id),
                Err(err) => err.into(),
            },
        })?;

        let lock = RegionTuple::from_item(&install)?.lock_key();
        self.ctx.store().transact(vec![TransactOp::delete(
            lock,
            Precondition::attr_equals("InstallId", id),
        )])
        .or_else(|err| {
            if err.is_condition_failure() {
                tracing::warn!(install_id = id, "region lock held by another install");
                Ok(())
            } else {
                Err(err)
            }
        })?;
        Ok(removed)
    }

    /// Page through installs.
    pub fn list(&self, opts: &ListOptions) -> Result<ListPage<Value>, FleetError> {
        list_aggregates(self.ctx.store(), EntityKind::Install, META_SK, opts)
    }

    /// Link devices; see [`LinkManager::link_devices`].
    pub fn link_devices(
        &self,
        id: &str,
        device_ids: &[String],
        reason: Option<&str>,
        actor: &Actor,
    ) -> Result<LinkReport, FleetError> {
        self.links.link_devices(id, device_ids, reason, actor)
    }

    /// Unlink devices; see [`LinkManager::unlink_devices`].
    pub fn unlink_devices(
        &self,
        id: &str,
        device_ids: &[String],
        reason: Option<&str>,
        actor: &Actor,
    ) -> Result<LinkReport, FleetError> {
        self.links.unlink_devices(id, device_ids, reason, actor)
    }

    /// Devices linked to the install.
    pub fn devices(&self, id: &str, opts: &ListOptions) -> Result<ListPage<Value>, FleetError> {
        self.links
            .list_devices_for_install(id, opts.page_limit()?, opts.next_token.as_deref())
    }

    /// Link/unlink history of the install.
    pub fn history(
        &self,
        id: &str,
        order: HistoryOrder,
        opts: &ListOptions,
    ) -> Result<ListPage<Value>, FleetError> {
        self.links
            .list_install_history(id, order, opts.page_limit()?, opts.next_token.as_deref())
    }

    /// Contacts linked to the install.
    pub fn contacts(&self, id: &str, opts: &ListOptions) -> Result<ListPage<Value>, FleetError> {
        self.links
            .list_contacts_for_install(id, opts.page_limit()?, opts.next_token.as_deref())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::services::{Filter, ListOptions, Services};
    use crate::store::MemoryStore;
    use crate::{Actor, FleetError, SystemClock};
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn services() -> Services {
        let store = Arc::new(MemoryStore::new());
        Services::new(store.clone(), store, Arc::new(SystemClock::new()))
    }

    fn install(id: &str, village: &str) -> Value {
        json!({
            "InstallId": id,
            "InstallName": "Borewell",
            "CustomerId": "CUST1",
            "StateId": "TS",
            "DistrictId": "HYD",
            "MandalId": "MDPL",
            "VillageId": village,
            "HabitationId": "H01"
        })
    }

    #[test]
    fn create_defaults_and_records_creator() {
        let svc = services();
        let item = svc
            .installs
            .create(&install("INS001", "VLG001"), &Actor::new("ops@example.com", None))
            .expect("create");
        assert_eq!(item.get_str("Status"), Some("active"));
        assert_eq!(item.get_str("CreatedBy"), Some("ops@example.com"));
    }

    #[test]
    fn region_is_freed_by_delete() {
        let svc = services();
        svc.installs
            .create(&install("INS001", "VLG001"), &Actor::system())
            .expect("first");
        assert!(matches!(
            svc.installs.create(&install("INS002", "VLG001"), &Actor::system()),
            Err(FleetError::Conflict { .. })
        ));
        svc.installs.delete("INS001").expect("delete");
        svc.installs
            .create(&install("INS002", "VLG001"), &Actor::system())
            .expect("region free again");
    }

    #[test]
    fn install_with_devices_cannot_be_deleted() {
        let svc = services();
        svc.installs
            .create(&install("INS001", "VLG001"), &Actor::system())
            .expect("install");
        svc.devices
            .create(&json!({"DeviceId": "DEV001", "DeviceName": "Pump", "DeviceType": "pump"}))
            .expect("device");
        let report = svc
            .installs
            .link_devices("INS001", &["DEV001".to_string()], None, &Actor::system())
            .expect("link");
        assert_eq!(report.succeeded_ids(), vec!["DEV001"]);
        assert!(matches!(
            svc.installs.delete("INS001"),
            Err(FleetError::Precondition(_))
        ));
    }

    #[test]
    fn region_fields_are_immutable() {
        let svc = services();
        svc.installs
            .create(&install("INS001", "VLG001"), &Actor::system())
            .expect("install");
        let err = svc
            .installs
            .update("INS001", &json!({"VillageId": "VLG002"}))
            .expect_err("immutable");
        assert!(matches!(err, FleetError::Validation(_)));
    }

    #[test]
    fn list_filters_by_customer() {
        let svc = services();
        svc.installs
            .create(&install("INS001", "VLG001"), &Actor::system())
            .expect("install");
        let page = svc
            .installs
            .list(&ListOptions::new().filter(Filter::equals("CustomerId", "OTHER")))
            .expect("list");
        assert!(page.items.is_empty());
    }
}
