//! # Item Store Contract
//!
//! The same behavioral checks run against every backend, so a
//! precondition or a cursor means exactly the same thing on both.

use fleetlink_core::{
    Item, ItemKey, ItemStore, MemoryStore, Patch, Precondition, Query, RedbStore, StoreError,
    TransactOp,
};
use serde_json::json;
use tempfile::TempDir;

// =============================================================================
// BACKENDS
// =============================================================================

fn backends() -> (Vec<(&'static str, Box<dyn ItemStore>)>, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let redb = RedbStore::open(dir.path().join("contract.redb"), "contract").expect("open redb");
    (
        vec![
            ("memory", Box::new(MemoryStore::new())),
            ("redb", Box::new(redb)),
        ],
        dir,
    )
}

fn item(pk: &str, sk: &str) -> Item {
    Item::new(&ItemKey::new(pk, sk), "TEST")
}

// =============================================================================
// CONTRACT
// =============================================================================

#[test]
fn conditional_put_and_delete() {
    let (stores, _dir) = backends();
    for (name, store) in &stores {
        store
            .put(item("DEVICE#1", "META"), Precondition::MustNotExist)
            .expect(name);
        assert!(
            matches!(
                store.put(item("DEVICE#1", "META"), Precondition::MustNotExist),
                Err(StoreError::Conflict(_))
            ),
            "{name}: duplicate put must conflict"
        );

        let key = ItemKey::new("DEVICE#1", "META");
        let old = store.delete(&key, Precondition::MustExist).expect(name);
        assert!(old.is_some(), "{name}: delete returns the pre-image");
        assert!(
            matches!(
                store.delete(&key, Precondition::MustExist),
                Err(StoreError::PreconditionFailed { .. })
            ),
            "{name}: second delete must fail"
        );
    }
}

#[test]
fn update_returns_post_image_and_respects_conditions() {
    let (stores, _dir) = backends();
    for (name, store) in &stores {
        let key = ItemKey::new("SIM#1", "META");
        let mut sim = item("SIM#1", "META");
        sim.set("status", json!("inactive"));
        store.put(sim, Precondition::None).expect(name);

        let updated = store
            .update(
                &key,
                &Patch::new()
                    .set("status", "active")
                    .append("changeHistory", json!({"action": "status_changed"})),
                Precondition::attr_equals("status", "inactive"),
            )
            .expect(name);
        assert_eq!(updated.get_str("status"), Some("active"), "{name}");
        assert_eq!(
            updated.get("changeHistory"),
            Some(&json!([{"action": "status_changed"}])),
            "{name}"
        );

        let stale = store.update(
            &key,
            &Patch::new().set("status", "suspended"),
            Precondition::attr_equals("status", "inactive"),
        );
        assert!(
            matches!(stale, Err(StoreError::PreconditionFailed { .. })),
            "{name}: stale condition must fail"
        );
    }
}

#[test]
fn cancelled_transaction_writes_nothing() {
    let (stores, _dir) = backends();
    for (name, store) in &stores {
        store
            .put(item("SIM#1", "META"), Precondition::None)
            .expect(name);
        let err = store
            .transact(vec![
                TransactOp::put(item("DEVICE#1", "SIM_ASSOC#1"), Precondition::MustNotExist),
                TransactOp::put(item("SIM#1", "META"), Precondition::MustNotExist),
            ])
            .expect_err(name);
        assert_eq!(err.failed_ops(), vec![1], "{name}");
        assert!(
            store
                .get(&ItemKey::new("DEVICE#1", "SIM_ASSOC#1"))
                .expect(name)
                .is_none(),
            "{name}: rolled back"
        );
    }
}

#[test]
fn counter_guards_parent_delete() {
    let (stores, _dir) = backends();
    for (name, store) in &stores {
        let parent = ItemKey::new("INSTALL#1", "META");
        store.put(item("INSTALL#1", "META"), Precondition::None).expect(name);
        store
            .transact(vec![
                TransactOp::update(
                    parent.clone(),
                    Patch::new().add("LinkedDeviceCount", 1),
                    Precondition::MustExist,
                ),
                TransactOp::put(item("INSTALL#1", "DEVICE_ASSOC#D1"), Precondition::MustNotExist),
            ])
            .expect(name);

        let refused = store.delete(&parent, Precondition::counter_zero("LinkedDeviceCount"));
        assert!(
            matches!(refused, Err(StoreError::PreconditionFailed { .. })),
            "{name}: counter is 1"
        );

        let after = store
            .update(
                &parent,
                &Patch::new().add("LinkedDeviceCount", -1),
                Precondition::MustExist,
            )
            .expect(name);
        assert_eq!(after.get("LinkedDeviceCount"), Some(&json!(0)), "{name}");
        store
            .delete(&parent, Precondition::counter_zero("LinkedDeviceCount"))
            .expect(name);
    }
}

#[test]
fn transactions_are_capped() {
    let (stores, _dir) = backends();
    for (name, store) in &stores {
        let ops: Vec<TransactOp> = (0..26)
            .map(|i| TransactOp::put(item("X#1", &format!("{:02}", i)), Precondition::None))
            .collect();
        assert!(
            matches!(store.transact(ops), Err(StoreError::InvalidRequest(_))),
            "{name}: 26 ops rejected"
        );
    }
}

#[test]
fn partition_pages_cover_every_item_once() {
    let (stores, _dir) = backends();
    for (name, store) in &stores {
        for i in 0..23 {
            store
                .put(item("INSTALL#1", &format!("DEVICE_ASSOC#{:03}", i)), Precondition::None)
                .expect(name);
        }
        store.put(item("INSTALL#1", "META"), Precondition::None).expect(name);
        store.put(item("INSTALL#2", "DEVICE_ASSOC#000"), Precondition::None).expect(name);

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = store
                .query("INSTALL#1", Some("DEVICE_ASSOC#"), 5, cursor.as_deref())
                .expect(name);
            seen.extend(page.items.iter().filter_map(|i| i.sk().map(str::to_string)));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        let expected: Vec<String> = (0..23).map(|i| format!("DEVICE_ASSOC#{:03}", i)).collect();
        assert_eq!(seen, expected, "{name}");
    }
}

#[test]
fn scan_lists_one_sort_key_across_partitions() {
    let (stores, _dir) = backends();
    for (name, store) in &stores {
        for id in ["A", "B", "C"] {
            store
                .put(item(&format!("DEVICE#{}", id), "META"), Precondition::None)
                .expect(name);
            store
                .put(item(&format!("DEVICE#{}", id), "CONFIG#v1#t"), Precondition::None)
                .expect(name);
        }
        store.put(item("SIM#A", "META"), Precondition::None).expect(name);

        let page = store.scan("DEVICE#", "META", 10, None).expect(name);
        assert_eq!(page.items.len(), 3, "{name}");
        assert!(page.next.is_none(), "{name}");

        let all = store
            .fetch(&Query::scan_all("DEVICE#").limit(100))
            .expect(name);
        assert_eq!(all.items.len(), 6, "{name}");
    }
}

#[test]
fn batch_get_omits_missing_and_is_bounded() {
    let (stores, _dir) = backends();
    for (name, store) in &stores {
        store.put(item("DEVICE#1", "META"), Precondition::None).expect(name);
        let found = store
            .batch_get(&[
                ItemKey::new("DEVICE#1", "META"),
                ItemKey::new("DEVICE#2", "META"),
            ])
            .expect(name);
        assert_eq!(found.len(), 1, "{name}");

        let too_many: Vec<ItemKey> = (0..101)
            .map(|i| ItemKey::new(format!("DEVICE#{}", i), "META"))
            .collect();
        assert!(store.batch_get(&too_many).is_err(), "{name}");
    }
}

#[test]
fn malformed_cursor_is_rejected() {
    let (stores, _dir) = backends();
    for (name, store) in &stores {
        assert!(
            matches!(
                store.query("DEVICE#1", None, 10, Some("!!not-a-cursor!!")),
                Err(StoreError::InvalidCursor(_))
            ),
            "{name}"
        );
    }
}
