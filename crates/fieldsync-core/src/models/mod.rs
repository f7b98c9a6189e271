//! Data models for fieldsync

mod entity;
mod entity_type;
mod inventory;
mod package;
mod photos;

pub use entity::{EntitySnapshot, ParentRef, SyncEntity};
pub use entity_type::{EntityType, FALLBACK_DIRECTORY, MERGE_ORDER};
pub use inventory::{
    ControlPoint, DetailedEquipment, Equipment, Event, Node, Pku, Remark, Section, Tube,
    NAMEPLATE_PHOTOS_FIELD, PHOTOS_FIELD,
};
pub use package::{
    EntityList, FileAttachment, FileMetadata, FileType, SyncEntities, SyncPackage,
};
pub use photos::PhotoPaths;
