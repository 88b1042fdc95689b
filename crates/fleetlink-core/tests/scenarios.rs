//! # End-to-End Scenarios
//!
//! Whole-workflow tests through the aggregate services, including races
//! between real threads sharing one store.

use fleetlink_core::link::sim::{linked_device_id, linked_sim_id};
use fleetlink_core::keys::{SubKey, prefix};
use fleetlink_core::{
    Actor, EntityKind, FleetError, Item, ItemKey, ItemStore, MemoryStore, Page, Patch,
    Precondition, Query, Services, StoreError, SystemClock, TransactOp, keys,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Barrier, Mutex, mpsc};
use std::thread;

// =============================================================================
// HELPERS
// =============================================================================

fn services() -> (Services, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let svc = Services::new(store.clone(), store.clone(), Arc::new(SystemClock::new()));
    (svc, store)
}

fn device(id: &str) -> Value {
    json!({"DeviceId": id, "DeviceName": "Chlorinator", "DeviceType": "chlorine"})
}

fn install(id: &str) -> Value {
    json!({
        "InstallId": id,
        "InstallName": "Village borewell",
        "CustomerId": "CUST1",
        "StateId": "TS",
        "DistrictId": "HYD",
        "MandalId": "MDPL",
        "VillageId": "VLG001",
        "HabitationId": "H01"
    })
}

/// Where an [`Interleave`] store runs its hook.
enum HookAt {
    /// Just before deleting this key.
    Delete(ItemKey),
    /// Just before the first batch read.
    BatchGet,
}

/// Store wrapper that runs a one-shot hook inside an intercepted call, so
/// a second writer commits between a service's read and its write.
struct Interleave {
    inner: Arc<MemoryStore>,
    at: HookAt,
    hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Interleave {
    fn new(inner: Arc<MemoryStore>, at: HookAt, hook: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner,
            at,
            hook: Mutex::new(Some(Box::new(hook))),
        }
    }

    fn fire(&self) {
        let hook = self.hook.lock().expect("hook lock").take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl fmt::Debug for Interleave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interleave").finish_non_exhaustive()
    }
}

impl ItemStore for Interleave {
    fn get(&self, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        self.inner.get(key)
    }

    fn put(&self, item: Item, condition: Precondition) -> Result<(), StoreError> {
        self.inner.put(item, condition)
    }

    fn update(
        &self,
        key: &ItemKey,
        patch: &Patch,
        condition: Precondition,
    ) -> Result<Item, StoreError> {
        self.inner.update(key, patch, condition)
    }

    fn delete(&self, key: &ItemKey, condition: Precondition) -> Result<Option<Item>, StoreError> {
        if matches!(&self.at, HookAt::Delete(target) if target == key) {
            self.fire();
        }
        self.inner.delete(key, condition)
    }

    fn fetch(&self, query: &Query) -> Result<Page, StoreError> {
        self.inner.fetch(query)
    }

    fn transact(&self, ops: Vec<TransactOp>) -> Result<(), StoreError> {
        self.inner.transact(ops)
    }

    fn batch_get(&self, keys: &[ItemKey]) -> Result<BTreeMap<ItemKey, Item>, StoreError> {
        if matches!(self.at, HookAt::BatchGet) {
            self.fire();
        }
        self.inner.batch_get(keys)
    }
}

fn services_on(store: Arc<dyn ItemStore>) -> Services {
    Services::new(store.clone(), store, Arc::new(SystemClock::new()))
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn install_assoc_count(store: &MemoryStore, device_id: &str) -> usize {
    store
        .query(
            &keys::pk(EntityKind::Device, device_id),
            Some(prefix::INSTALL_ASSOC),
            100,
            None,
        )
        .expect("query")
        .items
        .len()
}

/// Run `f` on `n` threads released together; collect results in order.
fn race<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    let barrier = Barrier::new(n);
    thread::scope(|s| {
        let handles: Vec<_> = (0..n)
            .map(|i| {
                let barrier = &barrier;
                let f = &f;
                s.spawn(move || {
                    barrier.wait();
                    f(i)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect()
    })
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn duplicate_device_create_conflicts() {
    let (svc, _) = services();
    svc.devices.create(&device("DEV001")).expect("first create");
    let err = svc.devices.create(&device("DEV001")).expect_err("second create");
    assert!(matches!(err, FleetError::Conflict { .. }));
    assert_eq!(err.to_string(), "DEVICE with ID DEV001 already exists");
}

#[test]
fn sim_link_is_visible_on_both_sides() {
    let (svc, store) = services();
    svc.sims
        .create(&json!({"simId": "SIM001", "iccid": "899100000000000001", "provider": "Airtel", "status": "active"}))
        .expect("sim");
    svc.devices.create(&device("DEV001")).expect("device");

    let link = svc
        .links
        .link_sim("DEV001", "SIM001", &Actor::new("ops", Some("10.0.0.1".into())))
        .expect("link");
    assert_eq!(link.sim_id, "SIM001");

    let dev = store
        .get(&keys::meta_key(EntityKind::Device, "DEV001"))
        .expect("read")
        .expect("device");
    assert_eq!(linked_sim_id(&dev), Some("SIM001"));

    let sim = store
        .get(&keys::meta_key(EntityKind::Sim, "SIM001"))
        .expect("read")
        .expect("sim");
    assert_eq!(linked_device_id(&sim), Some("DEV001"));
    let history = sim
        .get("changeHistory")
        .and_then(Value::as_array)
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["action"], json!("linked"));
    assert_eq!(history[0]["ipAddress"], json!("10.0.0.1"));
}

#[test]
fn second_sim_on_linked_device_is_refused() {
    let (svc, _) = services();
    for id in ["SIM001", "SIM002"] {
        svc.sims
            .create(&json!({"simId": id, "iccid": format!("89910000000000000{}", &id[5..]), "provider": "Airtel", "status": "active"}))
            .expect("sim");
    }
    svc.devices.create(&device("DEV001")).expect("device");
    svc.links
        .link_sim("DEV001", "SIM001", &Actor::system())
        .expect("link");

    let err = svc
        .links
        .link_sim("DEV001", "SIM002", &Actor::system())
        .expect_err("already linked");
    assert!(matches!(err, FleetError::Precondition(_)));
    assert_eq!(
        err.to_string(),
        "Device DEV001 already has a linked SIM: SIM001. Please unlink first."
    );
}

#[test]
fn bulk_link_reports_partial_success() {
    let (svc, _) = services();
    svc.installs
        .create(&install("INS001"), &Actor::system())
        .expect("install");
    svc.devices.create(&device("DEV001")).expect("device");
    svc.devices.create(&device("DEV002")).expect("device");

    let ids: Vec<String> = ["DEV001", "DEV002", "DEV999"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let report = svc
        .installs
        .link_devices("INS001", &ids, Some("commissioning"), &Actor::system())
        .expect("bulk link");

    assert_eq!(report.succeeded_ids(), vec!["DEV001", "DEV002"]);
    assert_eq!(
        serde_json::to_value(&report).expect("json")["errors"],
        json!([{"deviceId": "DEV999", "error": "Device DEV999 not found"}])
    );

    let history = svc
        .links
        .list_install_history("INS001", Default::default(), 10, None)
        .expect("history");
    assert_eq!(history.items.len(), 2);
}

#[test]
fn concurrent_installs_in_one_region_have_one_winner() {
    let (svc, _) = services();
    let results = race(2, |i| {
        svc.installs
            .create(&install(&format!("INS00{}", i + 1)), &Actor::system())
    });

    let winners: Vec<String> = results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .filter_map(|item| item.get_str("InstallId").map(str::to_string))
        .collect();
    assert_eq!(winners.len(), 1);

    let loser = results
        .iter()
        .find_map(|r| r.as_ref().err())
        .expect("one failure");
    assert!(matches!(
        loser,
        FleetError::Conflict { existing_id: Some(id), .. } if *id == winners[0]
    ));
}

#[test]
fn submitted_survey_is_frozen() {
    let (svc, _) = services();
    svc.surveys
        .create(
            &json!({
                "SurveyId": "SRV001",
                "CustomerId": "CUST1",
                "SurveyorName": "Ravi",
                "SurveyDate": "2024-06-01",
                "StateId": "TS",
                "DistrictId": "HYD",
                "MandalId": "MDPL",
                "VillageId": "VLG001",
                "HabitationId": "H01"
            }),
            &Actor::system(),
        )
        .expect("draft");
    svc.surveys.submit("SRV001", &Actor::system()).expect("submit");

    let err = svc
        .surveys
        .update("SRV001", &json!({"Notes": "late edit"}))
        .expect_err("frozen");
    assert!(matches!(err, FleetError::Precondition(_)));
    assert_eq!(err.to_string(), "Cannot update submitted survey");

    let err = svc.surveys.delete("SRV001").expect_err("frozen");
    assert_eq!(err.to_string(), "Cannot delete submitted survey");
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[test]
fn concurrent_creates_of_one_id_have_one_winner() {
    let (svc, _) = services();
    let results = race(8, |_| svc.devices.create(&device("DEV001")));
    let created = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(FleetError::Conflict { .. })))
        .count();
    assert_eq!(created, 1);
    assert_eq!(conflicts, 7);
}

#[test]
fn concurrent_sim_links_never_double_book() {
    let (svc, store) = services();
    svc.sims
        .create(&json!({"simId": "SIM001", "iccid": "899100000000000001", "provider": "Airtel", "status": "active"}))
        .expect("sim");
    for i in 0..4 {
        svc.devices
            .create(&device(&format!("DEV00{}", i)))
            .expect("device");
    }

    let results = race(4, |i| {
        svc.links
            .link_sim(&format!("DEV00{}", i), "SIM001", &Actor::system())
    });
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

    let sim = store
        .get(&keys::meta_key(EntityKind::Sim, "SIM001"))
        .expect("read")
        .expect("sim");
    let owner = linked_device_id(&sim).expect("owner").to_string();
    for i in 0..4 {
        let id = format!("DEV00{}", i);
        let dev = store
            .get(&keys::meta_key(EntityKind::Device, &id))
            .expect("read")
            .expect("device");
        assert_eq!(linked_sim_id(&dev).is_some(), id == owner);
    }
}

#[test]
fn link_landing_inside_install_delete_cancels_the_delete() {
    let inner = Arc::new(MemoryStore::new());
    let direct = services_on(inner.clone());
    direct
        .installs
        .create(&install("INS001"), &Actor::system())
        .expect("install");
    direct.devices.create(&device("DEV001")).expect("device");

    let (tx, rx) = mpsc::channel();
    let linker = services_on(inner.clone());
    let store = Interleave::new(
        inner.clone(),
        HookAt::Delete(keys::meta_key(EntityKind::Install, "INS001")),
        move || {
            let report = linker
                .installs
                .link_devices("INS001", &ids(&["DEV001"]), None, &Actor::system());
            tx.send(report).expect("send report");
        },
    );
    let svc = services_on(Arc::new(store));

    let err = svc.installs.delete("INS001").expect_err("delete must lose");
    assert!(matches!(err, FleetError::Precondition(_)));
    assert_eq!(
        err.to_string(),
        "Install INS001 has linked devices. Please unlink them first."
    );
    let report = rx.recv().expect("hook ran").expect("link");
    assert_eq!(report.succeeded_ids(), vec!["DEV001"]);

    let meta = inner
        .get(&keys::meta_key(EntityKind::Install, "INS001"))
        .expect("read")
        .expect("install survives");
    assert_eq!(meta.get("LinkedDeviceCount"), Some(&json!(1)));

    // The survivor is still fully manageable.
    direct
        .installs
        .unlink_devices("INS001", &ids(&["DEV001"]), None, &Actor::system())
        .expect("unlink");
    direct.installs.delete("INS001").expect("delete after unlink");
    direct.devices.delete("DEV001").expect("device delete");
}

#[test]
fn install_deleted_mid_link_leaves_no_association() {
    let inner = Arc::new(MemoryStore::new());
    let direct = services_on(inner.clone());
    direct
        .installs
        .create(&install("INS001"), &Actor::system())
        .expect("install");
    direct.devices.create(&device("DEV001")).expect("device");

    let deleter = services_on(inner.clone());
    let store = Interleave::new(inner.clone(), HookAt::BatchGet, move || {
        deleter.installs.delete("INS001").expect("delete");
    });
    let svc = services_on(Arc::new(store));

    let report = svc
        .installs
        .link_devices("INS001", &ids(&["DEV001"]), None, &Actor::system())
        .expect("link call");
    assert!(report.succeeded_ids().is_empty());
    assert_eq!(
        serde_json::to_value(&report).expect("json")["errors"],
        json!([{"deviceId": "DEV001", "error": "Install INS001 not found"}])
    );

    assert_eq!(install_assoc_count(&inner, "DEV001"), 0);
    let install_side = keys::child_key(
        EntityKind::Install,
        "INS001",
        &SubKey::DeviceAssoc {
            device_id: "DEV001".into(),
        },
    );
    assert!(inner.get(&install_side).expect("read").is_none());
    let dev = inner
        .get(&keys::meta_key(EntityKind::Device, "DEV001"))
        .expect("read")
        .expect("device");
    assert!(dev.get_str("LinkedInstallId").is_none());
    direct.devices.delete("DEV001").expect("device delete");
}

#[test]
fn concurrent_link_and_install_delete_never_orphan() {
    for _ in 0..8 {
        let (svc, store) = services();
        svc.installs
            .create(&install("INS001"), &Actor::system())
            .expect("install");
        svc.devices.create(&device("DEV001")).expect("device");

        race(2, |i| {
            if i == 0 {
                let _ = svc.installs.delete("INS001");
            } else {
                let _ = svc.installs.link_devices(
                    "INS001",
                    &ids(&["DEV001"]),
                    None,
                    &Actor::system(),
                );
            }
        });

        let install_alive = store
            .get(&keys::meta_key(EntityKind::Install, "INS001"))
            .expect("read")
            .is_some();
        if !install_alive {
            assert_eq!(install_assoc_count(&store, "DEV001"), 0);
        }
    }
}
