//! # redb-backed Item Store
//!
//! A disk-backed item store using the redb embedded database.
//!
//! Every item lives in a single table keyed by the `(PK, SK)` string
//! tuple, with the item's JSON encoding as value. redb provides:
//! - ACID write transactions (one per store verb, so each conditional
//!   write and each shared-fate transaction is atomic)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! Several logical tables (`TABLE_NAME`, `CUSTOMERS_TABLE`) can share one
//! database file via [`RedbStore::with_table`].

use super::{
    ItemStore, Page, PageBuilder, Patch, Precondition, StoreError, TableAccess, TransactOp,
    decode_cursor, delete_in, io_err, put_in, transact_in, update_in, validate_batch_get,
    validate_transact,
};
use crate::query::Query;
use crate::{Item, ItemKey};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

type ItemTable<'txn> = redb::Table<'txn, (&'static str, &'static str), &'static [u8]>;

fn decode_item(bytes: &[u8]) -> Result<Item, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn tuple_bound(bound: &Bound<ItemKey>) -> Bound<(&str, &str)> {
    match bound {
        Bound::Included(k) => Bound::Included((k.pk.as_str(), k.sk.as_str())),
        Bound::Excluded(k) => Bound::Excluded((k.pk.as_str(), k.sk.as_str())),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Write-side row access inside one redb write transaction.
struct RedbRows<'txn> {
    table: ItemTable<'txn>,
}

impl TableAccess for RedbRows<'_> {
    fn read(&self, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        let guard = self
            .table
            .get((key.pk.as_str(), key.sk.as_str()))
            .map_err(io_err)?;
        guard.map(|g| decode_item(g.value())).transpose()
    }

    fn write(&mut self, key: &ItemKey, item: &Item) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec(item).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.table
            .insert((key.pk.as_str(), key.sk.as_str()), bytes.as_slice())
            .map_err(io_err)?;
        Ok(())
    }

    fn erase(&mut self, key: &ItemKey) -> Result<(), StoreError> {
        self.table
            .remove((key.pk.as_str(), key.sk.as_str()))
            .map_err(io_err)?;
        Ok(())
    }
}

/// A disk-backed item store using redb.
#[derive(Clone)]
pub struct RedbStore {
    /// The redb database handle, shared between logical tables.
    db: Arc<Database>,
    /// Logical table name.
    table: String,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a database at `path` and ensure `table` exists.
    pub fn open(path: impl AsRef<Path>, table: &str) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;
        let store = Self {
            db: Arc::new(db),
            table: table.to_string(),
        };
        store.ensure_table()?;
        tracing::debug!(table = %store.table, "redb item store opened");
        Ok(store)
    }

    /// Another logical table in the same database file.
    pub fn with_table(&self, table: &str) -> Result<Self, StoreError> {
        let store = Self {
            db: Arc::clone(&self.db),
            table: table.to_string(),
        };
        store.ensure_table()?;
        Ok(store)
    }

    fn definition(&self) -> TableDefinition<'_, (&'static str, &'static str), &'static [u8]> {
        TableDefinition::new(&self.table)
    }

    fn ensure_table(&self) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let _ = write_txn.open_table(self.definition()).map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)
    }

    /// Run `op` inside one write transaction; commit on success, abort on error.
    fn write_scope<T>(
        &self,
        op: impl FnOnce(&mut RedbRows<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let write_txn = self.db.begin_write().map_err(io_err)?;
        let result = {
            let table = write_txn.open_table(self.definition()).map_err(io_err)?;
            let mut rows = RedbRows { table };
            op(&mut rows)
        };
        match result {
            Ok(value) => {
                write_txn.commit().map_err(io_err)?;
                Ok(value)
            }
            Err(e) => {
                write_txn.abort().map_err(io_err)?;
                Err(e)
            }
        }
    }
}

impl ItemStore for RedbStore {
    fn get(&self, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(self.definition()).map_err(io_err)?;
        let guard = table
            .get((key.pk.as_str(), key.sk.as_str()))
            .map_err(io_err)?;
        guard.map(|g| decode_item(g.value())).transpose()
    }

    fn put(&self, item: Item, condition: Precondition) -> Result<(), StoreError> {
        self.write_scope(|rows| put_in(rows, item, &condition))
    }

    fn update(
        &self,
        key: &ItemKey,
        patch: &Patch,
        condition: Precondition,
    ) -> Result<Item, StoreError> {
        self.write_scope(|rows| update_in(rows, key, patch, &condition))
    }

    fn delete(&self, key: &ItemKey, condition: Precondition) -> Result<Option<Item>, StoreError> {
        self.write_scope(|rows| delete_in(rows, key, &condition))
    }

    fn fetch(&self, query: &Query) -> Result<Page, StoreError> {
        let cursor = query.cursor.as_deref().map(decode_cursor).transpose()?;
        let Some((lower, upper)) = query.bounds(cursor.as_ref()) else {
            return Ok(Page::default());
        };

        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(self.definition()).map_err(io_err)?;
        let range = table
            .range::<(&str, &str)>((tuple_bound(&lower), tuple_bound(&upper)))
            .map_err(io_err)?;

        let entries: Box<dyn Iterator<Item = _>> = if query.descending {
            Box::new(range.rev())
        } else {
            Box::new(range)
        };

        let mut page = PageBuilder::new(query);
        for entry in entries {
            let (k, v) = entry.map_err(io_err)?;
            let (pk, sk) = k.value();
            if !page.offer(query, ItemKey::new(pk, sk), || decode_item(v.value()))? {
                break;
            }
        }
        page.finish()
    }

    fn transact(&self, ops: Vec<TransactOp>) -> Result<(), StoreError> {
        validate_transact(&ops)?;
        if ops.is_empty() {
            return Ok(());
        }
        self.write_scope(|rows| transact_in(rows, &ops))
    }

    fn batch_get(&self, keys: &[ItemKey]) -> Result<BTreeMap<ItemKey, Item>, StoreError> {
        validate_batch_get(keys)?;
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(self.definition()).map_err(io_err)?;
        let mut found = BTreeMap::new();
        for key in keys {
            if let Some(guard) = table
                .get((key.pk.as_str(), key.sk.as_str()))
                .map_err(io_err)?
            {
                found.insert(key.clone(), decode_item(guard.value())?);
            }
        }
        Ok(found)
    }
}

// =============================================================================
// TESTS
// =============================================================================
