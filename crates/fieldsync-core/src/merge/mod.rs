//! Merge engine
//!
//! Applies one incoming batch to the local store, type by type in parent-first
//! order, each type in its own store transaction. Records are joined to local
//! records by their device-local `id`; two devices that assigned the same id to
//! unrelated records are merged as if they were the same record.

mod report;
mod validation;

pub use report::{MergeReport, TypeCounts};
pub use validation::{
    find_violations, record_has_parents, validate_batch, BatchIndex, Violation, GUARDED_TYPES,
};

use serde::{Deserialize, Serialize};

use crate::conflict::{resolve, ConflictRecord};
use crate::error::Result;
use crate::models::{
    ControlPoint, DetailedEquipment, EntityList, Equipment, Event, Node, Pku, Remark, Section,
    SyncEntities, Tube,
};
use crate::store::LocalStore;

/// How incoming records that already exist locally are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Overwrite matched records unconditionally; no dependency checks.
    /// Used for restoring a package backup.
    #[default]
    Unvalidated,
    /// Reject batches with dangling parent references, skip orphan records,
    /// and let the conflict resolver decide every overlap. Used for live peer sync.
    Validated,
}

/// Merge `batch` into `store` using `strategy`.
///
/// A validated merge that fails the batch pre-check returns
/// [`Error::DependencyViolation`](crate::Error::DependencyViolation) before
/// touching the store.
pub fn merge<S: LocalStore>(
    store: &S,
    batch: &SyncEntities,
    strategy: MergeStrategy,
) -> Result<MergeReport> {
    let index = match strategy {
        MergeStrategy::Unvalidated => None,
        MergeStrategy::Validated => {
            validate_batch(batch)?;
            Some(BatchIndex::build(batch))
        }
    };

    let mut report = MergeReport::default();
    merge_type::<ControlPoint, S>(store, batch, index.as_ref(), &mut report)?;
    merge_type::<Pku, S>(store, batch, index.as_ref(), &mut report)?;
    merge_type::<Tube, S>(store, batch, index.as_ref(), &mut report)?;
    merge_type::<Section, S>(store, batch, index.as_ref(), &mut report)?;
    merge_type::<Node, S>(store, batch, index.as_ref(), &mut report)?;
    merge_type::<Equipment, S>(store, batch, index.as_ref(), &mut report)?;
    merge_type::<DetailedEquipment, S>(store, batch, index.as_ref(), &mut report)?;
    merge_type::<Remark, S>(store, batch, index.as_ref(), &mut report)?;
    merge_type::<Event, S>(store, batch, index.as_ref(), &mut report)?;

    tracing::info!(
        ?strategy,
        added = report.total_added(),
        updated = report.total_updated(),
        skipped = report.total_skipped(),
        conflicts = report.conflicts.len(),
        "Merged batch"
    );
    Ok(report)
}

/// Merge the records of one type inside a single store transaction.
///
/// `index` is present only for the validated strategy.
fn merge_type<T: EntityList, S: LocalStore>(
    store: &S,
    batch: &SyncEntities,
    index: Option<&BatchIndex>,
    report: &mut MergeReport,
) -> Result<()> {
    let incoming = T::list(batch);
    if incoming.is_empty() {
        return Ok(());
    }

    let (counts, conflicts) = store.in_transaction(T::ENTITY_TYPE, |store| {
        let mut counts = TypeCounts::default();
        let mut conflicts = Vec::new();

        for record in incoming {
            if let Some(index) = index {
                if !record_has_parents(&record.entity, index) {
                    tracing::warn!(
                        entity_type = %T::ENTITY_TYPE,
                        id = record.id(),
                        "Skipping record without a parent in the batch"
                    );
                    counts.skipped += 1;
                    continue;
                }
            }

            let Some(local) = store.get_by_id::<T>(record.id())? else {
                store.insert(record)?;
                counts.added += 1;
                continue;
            };

            if index.is_none() {
                store.update(record)?;
                counts.updated += 1;
                continue;
            }

            if local.entity == record.entity {
                counts.unchanged += 1;
                continue;
            }

            let resolution = resolve(
                &local.entity,
                &record.entity,
                local.last_modified,
                record.last_modified,
            );
            conflicts.push(ConflictRecord {
                entity_type: T::ENTITY_TYPE,
                entity_id: record.id(),
                local_last_modified: local.last_modified,
                incoming_last_modified: record.last_modified,
                winner: resolution.winner,
                reason: resolution.reason,
            });
            if resolution.incoming_wins() {
                store.update(record)?;
                counts.updated += 1;
            } else {
                counts.unchanged += 1;
            }
        }
        Ok((counts, conflicts))
    })?;

    tracing::debug!(
        entity_type = %T::ENTITY_TYPE,
        added = counts.added,
        updated = counts.updated,
        unchanged = counts.unchanged,
        skipped = counts.skipped,
        "Merged entity type"
    );
    *report.counts_mut(T::ENTITY_TYPE) += counts;
    report.conflicts.extend(conflicts);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::{ResolutionReason, Winner};
    use crate::error::Error;
    use crate::models::{EntitySnapshot, EntityType, SyncEntity};
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    fn snapshot<T: SyncEntity>(entity: T, ts: i64) -> EntitySnapshot<T> {
        EntitySnapshot::new(entity, ts, "b")
    }

    fn kp1() -> ControlPoint {
        ControlPoint {
            id: 1,
            name: "KP1".to_string(),
            ..Default::default()
        }
    }

    fn pku_a() -> Pku {
        Pku {
            id: 5,
            control_point_id: 1,
            name: "PKU-A".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn validated_merge_adds_child_and_leaves_identical_parent() {
        let store = MemoryStore::new();
        store.insert(&snapshot(kp1(), 100)).unwrap();

        let mut batch = SyncEntities::default();
        batch.control_points.push(snapshot(kp1(), 200));
        batch.pkus.push(snapshot(pku_a(), 200));

        let report = merge(&store, &batch, MergeStrategy::Validated).unwrap();
        assert_eq!(report.counts_for(EntityType::Pku).added, 1);
        assert_eq!(report.counts_for(EntityType::ControlPoint).unchanged, 1);
        assert!(report.conflicts.is_empty());
        assert_eq!(store.count(EntityType::ControlPoint).unwrap(), 1);
        assert_eq!(store.count(EntityType::Pku).unwrap(), 1);
    }

    #[test]
    fn dependency_violation_leaves_store_untouched() {
        let store = MemoryStore::new();
        store.insert(&snapshot(kp1(), 100)).unwrap();
        let before = store.dump();

        let mut batch = SyncEntities::default();
        batch.tubes.push(snapshot(
            Tube {
                id: 3,
                control_point_id: 1,
                name: "T-1".to_string(),
                ..Default::default()
            },
            300,
        ));
        batch.control_points.push(snapshot(
            ControlPoint {
                id: 2,
                name: "KP2".to_string(),
                ..Default::default()
            },
            300,
        ));
        batch.tubes[0].entity.control_point_id = 9;

        let error = merge(&store, &batch, MergeStrategy::Validated).unwrap_err();
        assert!(matches!(error, Error::DependencyViolation { .. }));
        assert_eq!(store.dump(), before);
    }

    #[test]
    fn validated_merge_is_idempotent() {
        let store = MemoryStore::new();
        store.insert(&snapshot(kp1(), 100)).unwrap();
        store
            .insert(&snapshot(
                Remark {
                    id: 4,
                    control_point_id: 1,
                    text: "Leak".to_string(),
                    priority: "Высокий".to_string(),
                    ..Default::default()
                },
                100,
            ))
            .unwrap();

        let mut batch = SyncEntities::default();
        batch.control_points.push(snapshot(
            ControlPoint {
                address: Some("Route 9".to_string()),
                ..kp1()
            },
            200,
        ));
        batch.remarks.push(snapshot(
            Remark {
                id: 4,
                control_point_id: 1,
                text: "Leak fixed".to_string(),
                priority: "Средний".to_string(),
                ..Default::default()
            },
            200,
        ));
        batch.pkus.push(snapshot(pku_a(), 200));

        let first = merge(&store, &batch, MergeStrategy::Validated).unwrap();
        let after_first = store.dump();
        assert_eq!(first.counts_for(EntityType::ControlPoint).updated, 1);
        assert_eq!(first.counts_for(EntityType::Remark).unchanged, 1);
        assert_eq!(first.conflicts.len(), 2);
        assert_eq!(first.conflicts[1].winner, Winner::Local);
        assert_eq!(first.conflicts[1].reason, ResolutionReason::DomainOverride);

        let second = merge(&store, &batch, MergeStrategy::Validated).unwrap();
        assert_eq!(store.dump(), after_first);
        assert_eq!(second.total_added() + second.total_updated(), 0);
    }

    #[test]
    fn unvalidated_merge_overwrites_and_ignores_dependencies() {
        let store = MemoryStore::new();
        store.insert(&snapshot(kp1(), 500)).unwrap();

        let mut batch = SyncEntities::default();
        batch.control_points.push(snapshot(
            ControlPoint {
                name: "KP-restored".to_string(),
                ..kp1()
            },
            1,
        ));
        batch.pkus.push(snapshot(
            Pku {
                control_point_id: 77,
                ..pku_a()
            },
            1,
        ));

        let report = merge(&store, &batch, MergeStrategy::Unvalidated).unwrap();
        assert_eq!(report.counts_for(EntityType::ControlPoint).updated, 1);
        assert_eq!(report.counts_for(EntityType::Pku).added, 1);
        let restored = store.get_by_id::<ControlPoint>(1).unwrap().unwrap();
        assert_eq!(restored.entity.name, "KP-restored");
        assert_eq!(restored.last_modified, 1);
    }

    #[test]
    fn orphan_equipment_is_skipped_not_fatal() {
        let store = MemoryStore::new();
        let mut batch = SyncEntities::default();
        batch.equipment.push(snapshot(
            Equipment {
                id: 9,
                name: "Loose pump".to_string(),
                ..Default::default()
            },
            10,
        ));
        batch.events.push(snapshot(
            Event {
                id: 1,
                control_point_id: 1,
                title: "Audit".to_string(),
                ..Default::default()
            },
            10,
        ));
        batch.control_points.push(snapshot(kp1(), 10));

        let report = merge(&store, &batch, MergeStrategy::Validated).unwrap();
        assert_eq!(report.counts_for(EntityType::Equipment).skipped, 1);
        assert_eq!(report.counts_for(EntityType::Event).added, 1);
        assert_eq!(store.count(EntityType::Equipment).unwrap(), 0);
    }

    #[test]
    fn newer_incoming_record_replaces_local() {
        let store = MemoryStore::new();
        store.insert(&snapshot(kp1(), 100)).unwrap();
        let mut batch = SyncEntities::default();
        batch.control_points.push(snapshot(
            ControlPoint {
                name: "KP-1 renamed".to_string(),
                ..kp1()
            },
            200,
        ));
        let report = merge(&store, &batch, MergeStrategy::Validated).unwrap();
        assert_eq!(report.conflicts[0].winner, Winner::Incoming);
        assert_eq!(
            store.get_by_id::<ControlPoint>(1).unwrap().unwrap().entity.name,
            "KP-1 renamed"
        );
    }
}
