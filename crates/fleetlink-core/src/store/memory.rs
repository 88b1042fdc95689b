//! # In-Memory Item Store
//!
//! Ordered map guarded by a mutex. Every verb runs under the lock, so each
//! write (including a whole transaction) is atomic with respect to every
//! other caller sharing the store.

use super::{
    ItemStore, Page, PageBuilder, Patch, Precondition, StoreError, TableAccess, TransactOp,
    decode_cursor, delete_in, put_in, transact_in, update_in, validate_batch_get,
    validate_transact,
};
use crate::query::Query;
use crate::{Item, ItemKey};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

type Rows = BTreeMap<ItemKey, Item>;

impl TableAccess for Rows {
    fn read(&self, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        Ok(self.get(key).cloned())
    }

    fn write(&mut self, key: &ItemKey, item: &Item) -> Result<(), StoreError> {
        self.insert(key.clone(), item.clone());
        Ok(())
    }

    fn erase(&mut self, key: &ItemKey) -> Result<(), StoreError> {
        self.remove(key);
        Ok(())
    }
}

/// In-process store. Cloning shares the underlying rows.
#[derive(Clone, Default)]
pub struct MemoryStore {
    rows: Arc<Mutex<Rows>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.rows.lock().map(|r| r.len()).unwrap_or_default();
        f.debug_struct("MemoryStore").field("items", &len).finish()
    }
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.len())
    }

    /// True when the store holds no items.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Rows>, StoreError> {
        self.rows
            .lock()
            .map_err(|_| StoreError::Io("memory store lock poisoned".to_string()))
    }
}

impl ItemStore for MemoryStore {
    fn get(&self, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        self.lock()?.read(key)
    }

    fn put(&self, item: Item, condition: Precondition) -> Result<(), StoreError> {
        put_in(&mut *self.lock()?, item, &condition)
    }

    fn update(
        &self,
        key: &ItemKey,
        patch: &Patch,
        condition: Precondition,
    ) -> Result<Item, StoreError> {
        update_in(&mut *self.lock()?, key, patch, &condition)
    }

    fn delete(&self, key: &ItemKey, condition: Precondition) -> Result<Option<Item>, StoreError> {
        delete_in(&mut *self.lock()?, key, &condition)
    }

    fn fetch(&self, query: &Query) -> Result<Page, StoreError> {
        let cursor = query.cursor.as_deref().map(decode_cursor).transpose()?;
        let Some(bounds) = query.bounds(cursor.as_ref()) else {
            return Ok(Page::default());
        };

        let rows = self.lock()?;
        let mut page = PageBuilder::new(query);
        let range = rows.range(bounds);
        if query.descending {
            for (key, item) in range.rev() {
                if !page.offer(query, key.clone(), || Ok(item.clone()))? {
                    break;
                }
            }
        } else {
            for (key, item) in range {
                if !page.offer(query, key.clone(), || Ok(item.clone()))? {
                    break;
                }
            }
        }
        page.finish()
    }

    fn transact(&self, ops: Vec<TransactOp>) -> Result<(), StoreError> {
        validate_transact(&ops)?;
        transact_in(&mut *self.lock()?, &ops)
    }

    fn batch_get(&self, keys: &[ItemKey]) -> Result<BTreeMap<ItemKey, Item>, StoreError> {
        validate_batch_get(keys)?;
        let rows = self.lock()?;
        Ok(keys
            .iter()
            .filter_map(|k| rows.get(k).map(|item| (k.clone(), item.clone())))
            .collect())
    }
}

// =============================================================================
// TESTS
// =============================================================================
