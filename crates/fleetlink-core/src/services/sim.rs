//! SIM aggregate. Attribute names are camelCase on SIM records.

use super::{Context, Filter, ListOptions, default_attr, list_aggregates, take_or_generate_id};
use crate::keys::{self, EntityKind};
use crate::link::LinkManager;
use crate::link::sim::{CHANGE_HISTORY, LINKED_DEVICE, linked_device_id};
use crate::primitives::META_SK;
use crate::store::{Precondition, StoreError};
use crate::validate::{Mode, schemas};
use crate::{Actor, FleetError, Item, ListPage};
use serde_json::{Value, json};

/// Orchestrates SIM operations. Status changes go through the link
/// manager, which owns the transition rules.
#[derive(Debug, Clone)]
pub struct SimService {
    ctx: Context,
    links: LinkManager,
}

impl SimService {
    pub(crate) fn new(ctx: Context, links: LinkManager) -> Self {
        Self { ctx, links }
    }

    /// Create a SIM, `inactive` unless the body says otherwise.
    pub fn create(&self, body: &Value) -> Result<Item, FleetError> {
        let mut fields = schemas::SIM
            .validate(body, Mode::Create)
            .map_err(FleetError::Validation)?;
        let id = take_or_generate_id(&mut fields, "simId");
        default_attr(&mut fields, "status", "inactive");
        let now = self.ctx.now();
        fields.insert(CHANGE_HISTORY.into(), json!([]));
        fields.insert("createdDate".into(), json!(now));
        fields.insert("updatedDate".into(), json!(now));
        self.ctx
            .create_meta(EntityKind::Sim, &keys::meta_key(EntityKind::Sim, &id), &id, fields)
    }

    /// SIM record.
    pub fn get(&self, id: &str) -> Result<Value, FleetError> {
        crate::link::check_id("simId", id)?;
        self.ctx
            .require(&keys::meta_key(EntityKind::Sim, id), "SIM", id)
            .map(|sim| sim.view())
    }

    /// Patch a SIM; a `status` in the body is a checked transition.
    pub fn update(&self, id: &str, body: &Value, actor: &Actor) -> Result<Item, FleetError> {
        let fields = schemas::SIM
            .validate(body, Mode::Update)
            .map_err(FleetError::Validation)?;
        self.links.update_sim(id, fields, actor)
    }

    /// Delete an unlinked SIM.
    pub fn delete(&self, id: &str) -> Result<(), FleetError> {
        crate::link::check_id("simId", id)?;
        let key = keys::meta_key(EntityKind::Sim, id);
        let sim = self.ctx.require(&key, "SIM", id)?;
        if let Some(device) = linked_device_id(&sim) {
            return Err(Self::linked_refusal(id, device));
        }
        let guard = Precondition::All(vec![
            Precondition::MustExist,
            Precondition::attr_empty(LINKED_DEVICE),
        ]);
        match self.ctx.store().delete(&key, guard) {
            Ok(_) => {
                tracing::info!(sim_id = id, "SIM deleted");
                Ok(())
            }
            Err(StoreError::PreconditionFailed { .. }) => match self.ctx.store().get(&key)? {
                None => Err(FleetError::not_found("SIM", id)),
                Some(sim) => Err(Self::linked_refusal(
                    id,
                    linked_device_id(&sim).unwrap_or_default(),
                )),
            },
            Err(err) => Err(err.into()),
        }
    }

    fn linked_refusal(id: &str, device: &str) -> FleetError {
        FleetError::precondition(format!(
            "Cannot delete SIM {}: it is linked to device {}. Please unlink first.",
            id, device
        ))
    }

    /// Page through SIMs.
    pub fn list(&self, opts: &ListOptions) -> Result<ListPage<Value>, FleetError> {
        list_aggregates(self.ctx.store(), EntityKind::Sim, META_SK, opts)
    }

    /// Page through SIMs with a given status.
    pub fn list_by_status(
        &self,
        status: &str,
        opts: &ListOptions,
    ) -> Result<ListPage<Value>, FleetError> {
        let opts = opts.clone().filter(Filter::equals("status", status));
        self.list(&opts)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::services::{ListOptions, Services};
    use crate::store::MemoryStore;
    use crate::{Actor, FleetError, SystemClock};
    use serde_json::json;
    use std::sync::Arc;

    fn services() -> Services {
        let store = Arc::new(MemoryStore::new());
        Services::new(store.clone(), store, Arc::new(SystemClock::new()))
    }

    #[test]
    fn new_sim_is_inactive_with_empty_history() {
        let svc = services();
        let sim = svc
            .sims
            .create(&json!({"simId": "SIM001", "iccid": "899100000000000001", "provider": "Jio"}))
            .expect("create");
        assert_eq!(sim.get_str("status"), Some("inactive"));
        assert_eq!(sim.get("changeHistory"), Some(&json!([])));
    }

    #[test]
    fn status_update_appends_history() {
        let svc = services();
        svc.sims
            .create(&json!({"simId": "SIM001", "iccid": "899100000000000001", "provider": "Jio"}))
            .expect("create");
        let sim = svc
            .sims
            .update("SIM001", &json!({"status": "active"}), &Actor::system())
            .expect("activate");
        let history = sim
            .get("changeHistory")
            .and_then(|h| h.as_array())
            .expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["newStatus"], json!("active"));
    }

    #[test]
    fn linked_sim_cannot_be_deleted() {
        let svc = services();
        svc.devices
            .create(&json!({"DeviceId": "DEV001", "DeviceName": "Pump", "DeviceType": "pump"}))
            .expect("device");
        svc.sims
            .create(&json!({"simId": "SIM001", "iccid": "899100000000000001", "provider": "Jio", "status": "active"}))
            .expect("sim");
        svc.links
            .link_sim("DEV001", "SIM001", &Actor::system())
            .expect("link");

        let err = svc.sims.delete("SIM001").expect_err("linked");
        assert_eq!(
            err.to_string(),
            "Cannot delete SIM SIM001: it is linked to device DEV001. Please unlink first."
        );
    }

    #[test]
    fn status_filter_applies_after_read() {
        let svc = services();
        svc.sims
            .create(&json!({"simId": "SIM001", "iccid": "899100000000000001", "provider": "Jio"}))
            .expect("inactive");
        svc.sims
            .create(&json!({"simId": "SIM002", "iccid": "899100000000000002", "provider": "Jio", "status": "active"}))
            .expect("active");
        let page = svc
            .sims
            .list_by_status("active", &ListOptions::new())
            .expect("list");
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0]["simId"], json!("SIM002"));
        assert!(matches!(svc.sims.get("SIM404"), Err(FleetError::NotFound(_))));
    }
}
