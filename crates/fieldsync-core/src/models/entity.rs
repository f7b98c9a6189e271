//! Common entity behavior and the transfer snapshot wrapper

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{EntityType, PhotoPaths};

/// Reference from a child record to one of its parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParentRef {
    pub entity_type: EntityType,
    pub id: i64,
}

impl ParentRef {
    pub const fn new(entity_type: EntityType, id: i64) -> Self {
        Self { entity_type, id }
    }
}

/// Behavior shared by every business record that takes part in sync.
///
/// `id` is the device-local surrogate key. It is used as the join key between
/// local and incoming records even though two devices may assign the same id
/// to unrelated records.
pub trait SyncEntity:
    Clone + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const ENTITY_TYPE: EntityType;

    fn id(&self) -> i64;

    /// Parent references this record carries (empty for roots).
    fn parents(&self) -> Vec<ParentRef>;

    /// Weighted sum over non-blank optional fields, used to break timestamp ties.
    fn completeness_score(&self) -> u32;

    /// Domain override predicate. `Some(true)` beats `Some(false)` regardless of
    /// timestamps; `None` means the type has no override.
    fn override_flag(&self) -> Option<bool> {
        None
    }

    /// Photo fields by wire field name.
    fn photo_fields(&self) -> Vec<(&'static str, &PhotoPaths)> {
        Vec::new()
    }

    fn photo_field_mut(&mut self, _field: &str) -> Option<&mut PhotoPaths> {
        None
    }
}

/// One record prepared for transfer, stamped by the producing device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound = "T: SyncEntity")]
pub struct EntitySnapshot<T: SyncEntity> {
    #[serde(flatten)]
    pub entity: T,
    /// Unix ms, assigned when the snapshot was built (not the original edit time)
    pub last_modified: i64,
    /// Producing device identifier
    #[serde(default)]
    pub origin_device: String,
}

impl<T: SyncEntity> EntitySnapshot<T> {
    pub fn new(entity: T, last_modified: i64, origin_device: impl Into<String>) -> Self {
        Self {
            entity,
            last_modified,
            origin_device: origin_device.into(),
        }
    }

    pub fn id(&self) -> i64 {
        self.entity.id()
    }

    /// Copy of this snapshot re-stamped for sending.
    #[must_use]
    pub fn restamped(&self, last_modified: i64, origin_device: &str) -> Self {
        Self::new(self.entity.clone(), last_modified, origin_device)
    }
}

/// Score helper: `weight` when the field is present, otherwise zero.
pub(crate) const fn weight(present: bool, weight: u32) -> u32 {
    if present {
        weight
    } else {
        0
    }
}
