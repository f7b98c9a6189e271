//! Local store layer
//!
//! The sync engine only needs simple per-type operations from the device's
//! store. Each entity type gets its own logical transaction; there is no
//! atomicity across types, so an interrupted merge can leave some types merged
//! and others untouched.

mod memory;
mod migrations;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::models::{
    ControlPoint, DetailedEquipment, EntityList, EntitySnapshot, EntityType, Equipment, Event,
    Node, Pku, Remark, Section, SyncEntities, SyncEntity, Tube, MERGE_ORDER,
};

/// Per-type record storage required by the merge engine and package builder.
pub trait LocalStore: Send + Sync {
    /// All records of type `T`, ordered by id
    fn get_all<T: SyncEntity>(&self) -> Result<Vec<EntitySnapshot<T>>>;

    /// Record of type `T` with the given id
    fn get_by_id<T: SyncEntity>(&self, id: i64) -> Result<Option<EntitySnapshot<T>>>;

    /// Insert a new record; fails if the id is taken
    fn insert<T: SyncEntity>(&self, record: &EntitySnapshot<T>) -> Result<()>;

    /// Replace an existing record; fails if the id is unknown
    fn update<T: SyncEntity>(&self, record: &EntitySnapshot<T>) -> Result<()>;

    /// Remove a record if present
    fn delete_by_id<T: SyncEntity>(&self, id: i64) -> Result<()>;

    /// Number of records of one type
    fn count(&self, entity_type: EntityType) -> Result<usize>;

    /// Run `work` as one transaction scoped to `entity_type`.
    ///
    /// On error every change `work` made to that type is rolled back.
    fn in_transaction<R, F>(&self, entity_type: EntityType, work: F) -> Result<R>
    where
        F: FnOnce(&Self) -> Result<R>,
        Self: Sized;
}

/// Record counts for every type in merge order.
pub fn entity_counts<S: LocalStore>(store: &S) -> Result<Vec<(EntityType, usize)>> {
    MERGE_ORDER
        .iter()
        .map(|entity_type| Ok((*entity_type, store.count(*entity_type)?)))
        .collect()
}

fn load_list<T: EntityList, S: LocalStore>(store: &S, entities: &mut SyncEntities) -> Result<()> {
    *T::list_mut(entities) = store.get_all::<T>()?;
    Ok(())
}

/// Read every record of every type.
pub fn load_entities<S: LocalStore>(store: &S) -> Result<SyncEntities> {
    let mut entities = SyncEntities::default();
    load_list::<ControlPoint, S>(store, &mut entities)?;
    load_list::<Pku, S>(store, &mut entities)?;
    load_list::<Tube, S>(store, &mut entities)?;
    load_list::<Section, S>(store, &mut entities)?;
    load_list::<Node, S>(store, &mut entities)?;
    load_list::<Equipment, S>(store, &mut entities)?;
    load_list::<DetailedEquipment, S>(store, &mut entities)?;
    load_list::<Remark, S>(store, &mut entities)?;
    load_list::<Event, S>(store, &mut entities)?;
    Ok(entities)
}

/// Copy every record of `source` into an in-memory store, for dry runs.
pub fn snapshot_into_memory<S: LocalStore>(source: &S) -> Result<MemoryStore> {
    let entities = load_entities(source)?;
    let copy = MemoryStore::new();
    crate::merge::merge(&copy, &entities, crate::merge::MergeStrategy::Unvalidated)?;
    Ok(copy)
}
