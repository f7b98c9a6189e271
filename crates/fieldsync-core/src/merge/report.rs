//! Merge counters

use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

use crate::conflict::ConflictRecord;
use crate::models::{EntityType, MERGE_ORDER};

/// Per-type outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCounts {
    pub added: usize,
    pub updated: usize,
    /// Matched a local record and left it as it was
    pub unchanged: usize,
    /// Dropped by the per-record guard
    pub skipped: usize,
}

impl AddAssign for TypeCounts {
    fn add_assign(&mut self, other: Self) {
        self.added += other.added;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
    }
}

/// Aggregate result of one or more merges. Reporting only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub counts: BTreeMap<EntityType, TypeCounts>,
    pub conflicts: Vec<ConflictRecord>,
}

impl MergeReport {
    pub fn counts_for(&self, entity_type: EntityType) -> TypeCounts {
        self.counts.get(&entity_type).copied().unwrap_or_default()
    }

    pub(crate) fn counts_mut(&mut self, entity_type: EntityType) -> &mut TypeCounts {
        self.counts.entry(entity_type).or_default()
    }

    pub fn total_added(&self) -> usize {
        self.counts.values().map(|counts| counts.added).sum()
    }

    pub fn total_updated(&self) -> usize {
        self.counts.values().map(|counts| counts.updated).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.counts.values().map(|counts| counts.skipped).sum()
    }

    /// Fold another report into this one.
    pub fn absorb(&mut self, other: Self) {
        for (entity_type, counts) in other.counts {
            *self.counts_mut(entity_type) += counts;
        }
        self.conflicts.extend(other.conflicts);
    }
}

impl fmt::Display for MergeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entity_type in MERGE_ORDER {
            let counts = self.counts_for(entity_type);
            if counts == TypeCounts::default() {
                continue;
            }
            writeln!(
                f,
                "{:<20} added {:>4}  updated {:>4}  unchanged {:>4}  skipped {:>4}",
                entity_type.as_str(),
                counts.added,
                counts.updated,
                counts.unchanged,
                counts.skipped
            )?;
        }
        write!(
            f,
            "total: {} added, {} updated, {} conflicts",
            self.total_added(),
            self.total_updated(),
            self.conflicts.len()
        )
    }
}
