//! In-process store used by tests, dry runs and previews

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde_json::Value;

use super::LocalStore;
use crate::error::{Error, Result};
use crate::models::{EntitySnapshot, EntityType, SyncEntity};

type Table = BTreeMap<i64, Value>;

/// Store keeping every record as JSON in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<EntityType, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record, used to compare store states in tests and previews.
    pub fn dump(&self) -> BTreeMap<EntityType, Table> {
        self.tables
            .read()
            .iter()
            .filter(|(_, table)| !table.is_empty())
            .map(|(entity_type, table)| (*entity_type, table.clone()))
            .collect()
    }

    fn decode<T: SyncEntity>(value: &Value) -> Result<EntitySnapshot<T>> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

impl LocalStore for MemoryStore {
    fn get_all<T: SyncEntity>(&self) -> Result<Vec<EntitySnapshot<T>>> {
        let tables = self.tables.read();
        tables
            .get(&T::ENTITY_TYPE)
            .map(|table| table.values().map(Self::decode).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn get_by_id<T: SyncEntity>(&self, id: i64) -> Result<Option<EntitySnapshot<T>>> {
        let tables = self.tables.read();
        tables
            .get(&T::ENTITY_TYPE)
            .and_then(|table| table.get(&id))
            .map(Self::decode)
            .transpose()
    }

    fn insert<T: SyncEntity>(&self, record: &EntitySnapshot<T>) -> Result<()> {
        let value = serde_json::to_value(record)?;
        let mut tables = self.tables.write();
        let table = tables.entry(T::ENTITY_TYPE).or_default();
        if table.contains_key(&record.id()) {
            return Err(Error::Store(format!(
                "{} {} already exists",
                T::ENTITY_TYPE,
                record.id()
            )));
        }
        table.insert(record.id(), value);
        Ok(())
    }

    fn update<T: SyncEntity>(&self, record: &EntitySnapshot<T>) -> Result<()> {
        let value = serde_json::to_value(record)?;
        let mut tables = self.tables.write();
        let slot = tables
            .get_mut(&T::ENTITY_TYPE)
            .and_then(|table| table.get_mut(&record.id()))
            .ok_or_else(|| Error::NotFound(format!("{} {}", T::ENTITY_TYPE, record.id())))?;
        *slot = value;
        Ok(())
    }

    fn delete_by_id<T: SyncEntity>(&self, id: i64) -> Result<()> {
        if let Some(table) = self.tables.write().get_mut(&T::ENTITY_TYPE) {
            table.remove(&id);
        }
        Ok(())
    }

    fn count(&self, entity_type: EntityType) -> Result<usize> {
        Ok(self.tables.read().get(&entity_type).map_or(0, BTreeMap::len))
    }

    fn in_transaction<R, F>(&self, entity_type: EntityType, work: F) -> Result<R>
    where
        F: FnOnce(&Self) -> Result<R>,
    {
        let before = self.tables.read().get(&entity_type).cloned();
        let result = work(self);
        if result.is_err() {
            let mut tables = self.tables.write();
            match before {
                Some(table) => {
                    tables.insert(entity_type, table);
                }
                None => {
                    tables.remove(&entity_type);
                }
            }
            tracing::debug!(%entity_type, "Rolled back in-memory transaction");
        }
        result
    }
}
