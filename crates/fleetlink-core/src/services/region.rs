//! Region hierarchy: STATE > DISTRICT > MANDAL > VILLAGE > HABITATION.
//!
//! Each region is one record keyed `{TYPE}#{code}` under both `PK` and
//! `SK`. Non-state regions carry the code of their parent level, and
//! every parent counts its children in `ChildCount`. Child create and
//! delete move that counter in the same transaction, and a region is only
//! deleted while its counter is zero.

use super::{Context, Filter, ListOptions};
use crate::keys::{self, EntityKind};
use crate::query::Query;
use crate::store::{Patch, Precondition, StoreError, TransactOp};
use crate::validate::{Mode, schemas};
use crate::{FleetError, Item, ItemKey, ListPage};
use serde_json::{Value, json};

const PARENT: &str = "ParentCode";
const CHILD_COUNT: &str = "ChildCount";

/// Parse a region type from a path segment.
pub fn region_kind(tag: &str) -> Result<EntityKind, FleetError> {
    EntityKind::from_tag(tag)
        .filter(|k| k.is_region())
        .ok_or_else(|| {
            FleetError::validation(format!(
                "Invalid region type: {}. Must be one of: STATE, DISTRICT, MANDAL, VILLAGE, HABITATION",
                tag
            ))
        })
}

/// Orchestrates region operations.
#[derive(Debug, Clone)]
pub struct RegionService {
    ctx: Context,
}

impl RegionService {
    pub(crate) fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    fn key(kind: EntityKind, code: &str) -> Result<ItemKey, FleetError> {
        crate::link::check_id("code", code)?;
        Ok(keys::region_key(kind, code))
    }

    /// Create a region under an existing parent.
    pub fn create(&self, region_type: &str, body: &Value) -> Result<Item, FleetError> {
        let kind = region_kind(region_type)?;
        let fields = schemas::REGION
            .validate(body, Mode::Create)
            .map_err(FleetError::Validation)?;
        let code = fields
            .get("Code")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let parent_code = fields.get(PARENT).and_then(Value::as_str).map(str::to_string);

        let parent = match (kind.parent_region(), parent_code) {
            (None, Some(_)) => {
                return Err(FleetError::validation(format!(
                    "{} regions have no parent",
                    kind.tag()
                )));
            }
            (Some(_), None) => {
                return Err(FleetError::validation(format!(
                    "ParentCode is required for {} regions",
                    kind.tag()
                )));
            }
            (Some(parent_kind), Some(code)) => Some((parent_kind, code)),
            (None, None) => None,
        };

        let now = self.ctx.now();
        let mut item = Item::new(&keys::region_key(kind, &code), kind.tag());
        for (name, value) in fields {
            item.set(&name, value);
        }
        item.set("RegionType", json!(kind.tag()));
        item.set("CreatedDate", json!(now));
        item.set("UpdatedDate", json!(now));
        if kind.child_region().is_some() {
            item.set(CHILD_COUNT, json!(0));
        }

        let mut ops = vec![TransactOp::put(item.clone(), Precondition::MustNotExist)];
        if let Some((parent_kind, parent_code)) = &parent {
            ops.push(TransactOp::update(
                keys::region_key(*parent_kind, parent_code),
                Patch::new().add(CHILD_COUNT, 1),
                Precondition::MustExist,
            ));
        }
        match self.ctx.store().transact(ops) {
            Ok(()) => {
                tracing::info!(kind = %kind, code = %code, "region created");
                Ok(item)
            }
            Err(err @ StoreError::TransactionCanceled { .. }) => match &parent {
                Some((parent_kind, parent_code)) if err.failed_ops().contains(&1) => Err(
                    FleetError::not_found(parent_kind.label(), parent_code),
                ),
                _ => Err(FleetError::already_exists(kind.tag(), &code)),
            },
            Err(err) => Err(err.into()),
        }
    }

    /// One region.
    pub fn get(&self, region_type: &str, code: &str) -> Result<Value, FleetError> {
        let kind = region_kind(region_type)?;
        self.ctx
            .require(&Self::key(kind, code)?, kind.label(), code)
            .map(|r| r.view())
    }

    /// Rename a region. Code and parent are fixed.
    pub fn update(&self, region_type: &str, code: &str, body: &Value) -> Result<Item, FleetError> {
        let kind = region_kind(region_type)?;
        let fields = schemas::REGION
            .validate(body, Mode::Update)
            .map_err(FleetError::Validation)?;
        self.ctx
            .patch_existing(&Self::key(kind, code)?, kind.label(), code, fields, "UpdatedDate")
    }

    /// Delete a region that has no child regions.
    pub fn delete(&self, region_type: &str, code: &str) -> Result<(), FleetError> {
        let kind = region_kind(region_type)?;
        let key = Self::key(kind, code)?;
        let region = self.ctx.require(&key, kind.label(), code)?;

        let mut ops = vec![TransactOp::delete(
            key.clone(),
            Precondition::counter_zero(CHILD_COUNT),
        )];
        if let (Some(parent_kind), Some(parent_code)) =
            (kind.parent_region(), region.get_str(PARENT))
        {
            ops.push(TransactOp::update(
                keys::region_key(parent_kind, parent_code),
                Patch::new().add(CHILD_COUNT, -1),
                Precondition::MustExist,
            ));
        }
        match self.ctx.store().transact(ops) {
            Ok(()) => {
                tracing::info!(kind = %kind, code = %code, "region deleted");
                Ok(())
            }
            Err(err @ StoreError::TransactionCanceled { .. }) if err.failed_ops().contains(&0) => {
                match self.ctx.store().get(&key)? {
                    None => Err(FleetError::not_found(kind.label(), code)),
                    Some(_) => Err(FleetError::precondition(format!(
                        "{} {} has {} regions. Delete them first.",
                        kind.label(),
                        code,
                        kind.child_region().map_or("child", EntityKind::tag)
                    ))),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Page through regions of one type, optionally under one parent.
    pub fn list(
        &self,
        region_type: &str,
        parent: Option<&str>,
        opts: &ListOptions,
    ) -> Result<ListPage<Value>, FleetError> {
        let kind = region_kind(region_type)?;
        let mut opts = opts.clone();
        if let Some(parent) = parent {
            opts = opts.filter(Filter::equals(PARENT, parent));
        }
        let page = self.ctx.store().fetch(
            &Query::scan_all(kind.pk_prefix())
                .limit(opts.page_limit()?)
                .after(opts.next_token.clone()),
        )?;
        Ok(ListPage::new(
            page.items
                .iter()
                .filter(|r| opts.keep(r))
                .map(Item::view)
                .collect(),
            page.next,
        ))
    }

    /// Regions one level below `code`.
    pub fn children(
        &self,
        region_type: &str,
        code: &str,
        opts: &ListOptions,
    ) -> Result<ListPage<Value>, FleetError> {
        let kind = region_kind(region_type)?;
        let child_kind = kind.child_region().ok_or_else(|| {
            FleetError::validation(format!("{} regions have no children", kind.tag()))
        })?;
        self.ctx
            .require(&Self::key(kind, code)?, kind.label(), code)?;
        self.list(child_kind.tag(), Some(code), opts)
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
    use crate::SystemClock;
    use std::sync::Arc;

    fn services() -> Services {
        let store = Arc::new(MemoryStore::new());
        Services::new(store.clone(), store, Arc::new(SystemClock::new()))
    }

    fn seed(svc: &Services) {
        svc.regions
            .create("state", &json!({"Code": "TS", "Name": "Telangana"}))
            .expect("state");
        svc.regions
            .create("district", &json!({"Code": "HYD", "Name": "Hyderabad", "ParentCode": "TS"}))
            .expect("district");
        svc.regions
            .create("district", &json!({"Code": "WGL", "Name": "Warangal", "ParentCode": "TS"}))
            .expect("district");
    }

    #[test]
    fn parent_must_exist() {
        let svc = services();
        let err = svc
            .regions
            .create("district", &json!({"Code": "HYD", "Name": "Hyderabad", "ParentCode": "AP"}))
            .expect_err("no parent");
        assert_eq!(err.to_string(), "State AP not found");
    }

    #[test]
    fn children_are_listed_by_parent() {
        let svc = services();
        seed(&svc);
        let page = svc
            .regions
            .children("STATE", "TS", &ListOptions::new())
            .expect("children");
        assert_eq!(page.items.len(), 2);
        let none = svc
            .regions
            .list("DISTRICT", Some("AP"), &ListOptions::new())
            .expect("list");
        assert!(none.items.is_empty());
    }

    #[test]
    fn region_with_children_is_kept() {
        let svc = services();
        seed(&svc);
        assert!(matches!(
            svc.regions.delete("STATE", "TS"),
            Err(FleetError::Precondition(_))
        ));
        svc.regions.delete("DISTRICT", "HYD").expect("leaf");
        assert!(matches!(
            svc.regions.get("DISTRICT", "HYD"),
            Err(FleetError::NotFound(_))
        ));
    }

    fn child_count(svc: &Services, kind: &str, code: &str) -> Option<i64> {
        svc.regions
            .get(kind, code)
            .expect("region")
            .get(CHILD_COUNT)
            .and_then(Value::as_i64)
    }

    #[test]
    fn parent_counter_follows_children() {
        let svc = services();
        seed(&svc);
        assert_eq!(child_count(&svc, "STATE", "TS"), Some(2));
        assert_eq!(child_count(&svc, "DISTRICT", "HYD"), Some(0));

        svc.regions.delete("DISTRICT", "HYD").expect("leaf");
        assert_eq!(child_count(&svc, "STATE", "TS"), Some(1));
        let err = svc.regions.delete("STATE", "TS").expect_err("one child left");
        assert_eq!(err.to_string(), "State TS has DISTRICT regions. Delete them first.");

        svc.regions.delete("DISTRICT", "WGL").expect("leaf");
        assert_eq!(child_count(&svc, "STATE", "TS"), Some(0));
        svc.regions.delete("STATE", "TS").expect("empty state");
        assert!(matches!(
            svc.regions.delete("STATE", "TS"),
            Err(FleetError::NotFound(_))
        ));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let svc = services();
        assert!(matches!(
            svc.regions.list("COUNTY", None, &ListOptions::new()),
            Err(FleetError::Validation(_))
        ));
        seed(&svc);
        let renamed = svc
            .regions
            .update("STATE", "TS", &json!({"Name": "Telangana State"}))
            .expect("rename");
        assert_eq!(renamed.get_str("Name"), Some("Telangana State"));
    }
}
