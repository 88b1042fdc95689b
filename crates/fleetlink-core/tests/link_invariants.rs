//! # Link Invariant Properties
//!
//! Random sequences of link, unlink and delete calls must leave both sides
//! of every association in agreement with no association outliving either
//! META. Links must never lose history, and every list must page through
//! each record exactly once.

use fleetlink_core::keys::{self, EntityKind, SubKey, prefix};
use fleetlink_core::link::sim::{linked_device_id, linked_sim_id};
use fleetlink_core::{
    Actor, ItemKey, ItemStore, ListOptions, MemoryStore, Services, SystemClock,
};
use proptest::collection::vec;
use proptest::prelude::*;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;

const DEVICES: usize = 4;
const SIMS: usize = 3;
const INSTALLS: usize = 2;

// =============================================================================
// MODEL
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    LinkSim(usize, usize),
    UnlinkSim(usize),
    LinkDevice(usize, usize),
    UnlinkDevice(usize, usize),
    DeleteInstall(usize),
    DeleteDevice(usize),
}

/// Link and unlink calls only.
fn link_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..DEVICES, 0..SIMS).prop_map(|(d, s)| Op::LinkSim(d, s)),
        (0..DEVICES).prop_map(Op::UnlinkSim),
        (0..INSTALLS, 0..DEVICES).prop_map(|(i, d)| Op::LinkDevice(i, d)),
        (0..INSTALLS, 0..DEVICES).prop_map(|(i, d)| Op::UnlinkDevice(i, d)),
    ]
}

/// Links interleaved with aggregate deletes.
fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => link_op(),
        1 => (0..INSTALLS).prop_map(Op::DeleteInstall),
        1 => (0..DEVICES).prop_map(Op::DeleteDevice),
    ]
}

fn device_id(d: usize) -> String {
    format!("DEV{:03}", d)
}

fn sim_id(s: usize) -> String {
    format!("SIM{:03}", s)
}

fn install_id(i: usize) -> String {
    format!("INS{:03}", i)
}

fn fixture() -> (Services, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let svc = Services::new(store.clone(), store.clone(), Arc::new(SystemClock::new()));
    for d in 0..DEVICES {
        svc.devices
            .create(&json!({"DeviceId": device_id(d), "DeviceName": "Pump", "DeviceType": "pump"}))
            .expect("device");
    }
    for s in 0..SIMS {
        svc.sims
            .create(&json!({
                "simId": sim_id(s),
                "iccid": format!("8991000000000000{:02}", s),
                "provider": "Airtel",
                "status": "active"
            }))
            .expect("sim");
    }
    for i in 0..INSTALLS {
        svc.installs
            .create(
                &json!({
                    "InstallId": install_id(i),
                    "InstallName": "Site",
                    "CustomerId": "CUST1",
                    "StateId": "TS",
                    "DistrictId": "HYD",
                    "MandalId": "MDPL",
                    "VillageId": format!("VLG{:03}", i),
                    "HabitationId": "H01"
                }),
                &Actor::system(),
            )
            .expect("install");
    }
    (svc, store)
}

/// Outcomes are ignored: refused operations are part of the sequence.
fn apply(svc: &Services, op: &Op) {
    let actor = Actor::system();
    let _ = match op {
        Op::LinkSim(d, s) => svc.links.link_sim(&device_id(*d), &sim_id(*s), &actor).map(drop),
        Op::UnlinkSim(d) => svc.links.unlink_sim(&device_id(*d), &actor).map(drop),
        Op::LinkDevice(i, d) => svc
            .links
            .link_devices(&install_id(*i), &[device_id(*d)], None, &actor)
            .map(drop),
        Op::UnlinkDevice(i, d) => svc
            .links
            .unlink_devices(&install_id(*i), &[device_id(*d)], None, &actor)
            .map(drop),
        Op::DeleteInstall(i) => svc.installs.delete(&install_id(*i)).map(drop),
        Op::DeleteDevice(d) => svc.devices.delete(&device_id(*d)).map(drop),
    };
}

fn exists(store: &MemoryStore, key: &ItemKey) -> bool {
    store.get(key).expect("read").is_some()
}

/// History row keys per install plus `changeHistory` entries per SIM.
fn history_snapshot(store: &MemoryStore) -> BTreeSet<String> {
    let mut rows = BTreeSet::new();
    for i in 0..INSTALLS {
        let page = store
            .query(
                &keys::pk(EntityKind::Install, &install_id(i)),
                Some(prefix::DEVICE_HISTORY),
                100,
                None,
            )
            .expect("history");
        rows.extend(page.items.iter().filter_map(|h| h.sk().map(str::to_string)));
    }
    for s in 0..SIMS {
        let sim = store
            .get(&keys::meta_key(EntityKind::Sim, &sim_id(s)))
            .expect("read")
            .expect("sim");
        if let Some(entries) = sim.get("changeHistory").and_then(Value::as_array) {
            rows.extend(entries.iter().map(|e| format!("{}:{}", sim_id(s), e)));
        }
    }
    rows
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// SIM and device agree on every SIM link.
    #[test]
    fn sim_links_are_a_bijection(ops in vec(op(), 1..30)) {
        let (svc, store) = fixture();
        for op in &ops {
            apply(&svc, op);
        }
        for d in 0..DEVICES {
            let device = store
                .get(&keys::meta_key(EntityKind::Device, &device_id(d)))
                .expect("read");
            for s in 0..SIMS {
                let sim = store
                    .get(&keys::meta_key(EntityKind::Sim, &sim_id(s)))
                    .expect("read")
                    .expect("sim");
                let sim_side = linked_device_id(&sim) == Some(device_id(d).as_str());
                let assoc = exists(
                    &store,
                    &keys::child_key(EntityKind::Device, &device_id(d), &SubKey::SimAssoc { sim_id: sim_id(s) }),
                );
                let device_side = device
                    .as_ref()
                    .is_some_and(|dev| linked_sim_id(dev) == Some(sim_id(s).as_str()));
                prop_assert_eq!(sim_side, assoc);
                prop_assert_eq!(assoc, device_side);
            }
        }
    }

    /// Install and device associations always come in pairs, a device
    /// belongs to at most one install, and no association outlives the
    /// META on either side.
    #[test]
    fn install_links_are_symmetric(ops in vec(op(), 1..30)) {
        let (svc, store) = fixture();
        for op in &ops {
            apply(&svc, op);
        }
        for d in 0..DEVICES {
            let device = store
                .get(&keys::meta_key(EntityKind::Device, &device_id(d)))
                .expect("read");
            let mut owners = 0;
            for i in 0..INSTALLS {
                let install_side = exists(
                    &store,
                    &keys::child_key(EntityKind::Install, &install_id(i), &SubKey::DeviceAssoc { device_id: device_id(d) }),
                );
                let device_side = exists(
                    &store,
                    &keys::child_key(EntityKind::Device, &device_id(d), &SubKey::InstallAssoc { install_id: install_id(i) }),
                );
                prop_assert_eq!(install_side, device_side);
                if install_side {
                    prop_assert!(exists(&store, &keys::meta_key(EntityKind::Install, &install_id(i))));
                    prop_assert!(device.is_some());
                }
                let pointer = device
                    .as_ref()
                    .and_then(|dev| dev.get_str("LinkedInstallId"))
                    == Some(install_id(i).as_str());
                prop_assert_eq!(pointer, install_side);
                owners += usize::from(install_side);
            }
            prop_assert!(owners <= 1);
        }
    }

    /// An install's device counter matches its association rows.
    #[test]
    fn install_counter_tracks_links(ops in vec(op(), 1..30)) {
        let (svc, store) = fixture();
        for op in &ops {
            apply(&svc, op);
        }
        for i in 0..INSTALLS {
            let Some(install) = store
                .get(&keys::meta_key(EntityKind::Install, &install_id(i)))
                .expect("read")
            else {
                continue;
            };
            let rows = store
                .query(
                    &keys::pk(EntityKind::Install, &install_id(i)),
                    Some(prefix::DEVICE_ASSOC),
                    100,
                    None,
                )
                .expect("assocs")
                .items
                .len();
            let counter = install.get("LinkedDeviceCount").and_then(Value::as_i64);
            prop_assert_eq!(counter, i64::try_from(rows).ok());
        }
    }

    /// No link or unlink removes a history row.
    #[test]
    fn history_only_grows(ops in vec(link_op(), 1..30)) {
        let (svc, store) = fixture();
        let mut before = history_snapshot(&store);
        for op in &ops {
            apply(&svc, op);
            let after = history_snapshot(&store);
            prop_assert!(before.is_subset(&after));
            before = after;
        }
    }

    /// Following `nextToken` visits every device exactly once.
    #[test]
    fn device_pages_are_complete(count in 0usize..40, limit in 1usize..12) {
        let store = Arc::new(MemoryStore::new());
        let svc = Services::new(store.clone(), store, Arc::new(SystemClock::new()));
        for d in 0..count {
            svc.devices
                .create(&json!({"DeviceId": device_id(d), "DeviceName": "Pump", "DeviceType": "pump"}))
                .expect("device");
            svc.devices
                .add_config(&device_id(d), &json!({"ConfigVersion": "v1", "Settings": {}}))
                .expect("config");
        }

        let mut seen = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = svc
                .devices
                .list(&ListOptions::new().limit(limit).after(token.clone()))
                .expect("page");
            prop_assert!(page.items.len() <= limit);
            seen.extend(page.items.iter().filter_map(|d| d["DeviceId"].as_str().map(str::to_string)));
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        let expected: Vec<String> = (0..count).map(device_id).collect();
        prop_assert_eq!(seen, expected);
    }
}
