//! Dependency checks for incoming batches
//!
//! Two separate phases run against the incoming batch only, never the local
//! store:
//! - the batch pre-check rejects the whole batch when any child references a
//!   parent id absent from the batch
//! - the per-record guard skips a single equipment, detailed equipment, remark
//!   or event record that has no resolvable parent in the batch

use std::collections::{HashMap, HashSet};

use crate::error::Error;
use crate::models::{
    ControlPoint, DetailedEquipment, EntityList, EntityType, Equipment, Event, Node, ParentRef,
    Pku, Remark, Section, SyncEntities, SyncEntity, Tube,
};

/// A child record pointing at a parent missing from its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Violation {
    pub child: EntityType,
    pub child_id: i64,
    pub parent: ParentRef,
}

impl From<Violation> for Error {
    fn from(violation: Violation) -> Self {
        Self::DependencyViolation {
            child: violation.child,
            child_id: violation.child_id,
            parent: violation.parent.entity_type,
            parent_id: violation.parent.id,
        }
    }
}

/// Ids present in a batch, per entity type.
#[derive(Debug, Default)]
pub struct BatchIndex {
    ids: HashMap<EntityType, HashSet<i64>>,
}

impl BatchIndex {
    pub fn build(batch: &SyncEntities) -> Self {
        let mut index = Self::default();
        index.add::<ControlPoint>(batch);
        index.add::<Pku>(batch);
        index.add::<Tube>(batch);
        index.add::<Section>(batch);
        index.add::<Node>(batch);
        index.add::<Equipment>(batch);
        index.add::<DetailedEquipment>(batch);
        index.add::<Remark>(batch);
        index.add::<Event>(batch);
        index
    }

    fn add<T: EntityList>(&mut self, batch: &SyncEntities) {
        self.ids
            .entry(T::ENTITY_TYPE)
            .or_default()
            .extend(T::list(batch).iter().map(|record| record.id()));
    }

    pub fn contains(&self, parent: ParentRef) -> bool {
        self.ids
            .get(&parent.entity_type)
            .is_some_and(|ids| ids.contains(&parent.id))
    }
}

fn violations_of<T: EntityList>(batch: &SyncEntities, index: &BatchIndex, out: &mut Vec<Violation>) {
    for record in T::list(batch) {
        out.extend(
            record
                .entity
                .parents()
                .into_iter()
                .filter(|parent| !index.contains(*parent))
                .map(|parent| Violation {
                    child: T::ENTITY_TYPE,
                    child_id: record.id(),
                    parent,
                }),
        );
    }
}

/// Every dangling parent reference in the batch, children in merge order.
pub fn find_violations(batch: &SyncEntities) -> Vec<Violation> {
    let index = BatchIndex::build(batch);
    let mut violations = Vec::new();
    violations_of::<Pku>(batch, &index, &mut violations);
    violations_of::<Tube>(batch, &index, &mut violations);
    violations_of::<Section>(batch, &index, &mut violations);
    violations_of::<Node>(batch, &index, &mut violations);
    violations_of::<Equipment>(batch, &index, &mut violations);
    violations_of::<DetailedEquipment>(batch, &index, &mut violations);
    violations_of::<Remark>(batch, &index, &mut violations);
    violations_of::<Event>(batch, &index, &mut violations);
    violations
}

/// Batch pre-check: fail on the first dangling parent reference.
pub fn validate_batch(batch: &SyncEntities) -> Result<(), Error> {
    match find_violations(batch).into_iter().next() {
        Some(violation) => Err(violation.into()),
        None => Ok(()),
    }
}

/// Types whose records pass through the per-record guard
pub const GUARDED_TYPES: [EntityType; 4] = [
    EntityType::Equipment,
    EntityType::DetailedEquipment,
    EntityType::Remark,
    EntityType::Event,
];

/// Per-record guard: the record needs at least one parent and every parent
/// must be in the batch.
pub fn record_has_parents<T: SyncEntity>(record: &T, index: &BatchIndex) -> bool {
    if !GUARDED_TYPES.contains(&T::ENTITY_TYPE) {
        return true;
    }
    let parents = record.parents();
    !parents.is_empty() && parents.into_iter().all(|parent| index.contains(parent))
}
