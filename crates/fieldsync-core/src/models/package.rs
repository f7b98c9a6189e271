//! Sync package model: the full entity-graph snapshot exchanged between peers

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{
    ControlPoint, DetailedEquipment, EntitySnapshot, EntityType, Equipment, Event, Node, Pku,
    Remark, Section, SyncEntity, Tube,
};
use crate::error::{Error, Result};

/// One list of snapshots per entity type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncEntities {
    pub control_points: Vec<EntitySnapshot<ControlPoint>>,
    pub pkus: Vec<EntitySnapshot<Pku>>,
    pub tubes: Vec<EntitySnapshot<Tube>>,
    pub sections: Vec<EntitySnapshot<Section>>,
    pub nodes: Vec<EntitySnapshot<Node>>,
    pub equipment: Vec<EntitySnapshot<Equipment>>,
    pub detailed_equipment: Vec<EntitySnapshot<DetailedEquipment>>,
    pub remarks: Vec<EntitySnapshot<Remark>>,
    pub events: Vec<EntitySnapshot<Event>>,
}

/// Typed access to the list of one entity type inside [`SyncEntities`].
pub trait EntityList: SyncEntity {
    fn list(entities: &SyncEntities) -> &Vec<EntitySnapshot<Self>>;
    fn list_mut(entities: &mut SyncEntities) -> &mut Vec<EntitySnapshot<Self>>;
}

macro_rules! entity_list {
    ($type:ty, $field:ident) => {
        impl EntityList for $type {
            fn list(entities: &SyncEntities) -> &Vec<EntitySnapshot<Self>> {
                &entities.$field
            }

            fn list_mut(entities: &mut SyncEntities) -> &mut Vec<EntitySnapshot<Self>> {
                &mut entities.$field
            }
        }
    };
}

entity_list!(ControlPoint, control_points);
entity_list!(Pku, pkus);
entity_list!(Tube, tubes);
entity_list!(Section, sections);
entity_list!(Node, nodes);
entity_list!(Equipment, equipment);
entity_list!(DetailedEquipment, detailed_equipment);
entity_list!(Remark, remarks);
entity_list!(Event, events);

impl SyncEntities {
    /// Number of records of one type.
    pub fn count(&self, entity_type: EntityType) -> usize {
        match entity_type {
            EntityType::ControlPoint => self.control_points.len(),
            EntityType::Pku => self.pkus.len(),
            EntityType::Tube => self.tubes.len(),
            EntityType::Section => self.sections.len(),
            EntityType::Node => self.nodes.len(),
            EntityType::Equipment => self.equipment.len(),
            EntityType::DetailedEquipment => self.detailed_equipment.len(),
            EntityType::Remark => self.remarks.len(),
            EntityType::Event => self.events.len(),
        }
    }

    pub fn total(&self) -> usize {
        super::MERGE_ORDER
            .iter()
            .map(|entity_type| self.count(*entity_type))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Kind of attached file, derived from its extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Photo,
    Document,
    #[default]
    #[serde(other)]
    Unknown,
}

impl FileType {
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "jpg" | "jpeg" | "png" | "webp" | "heic" | "gif" | "bmp" => Self::Photo,
            "pdf" | "doc" | "docx" | "txt" | "xls" | "xlsx" | "odt" => Self::Document,
            _ => Self::Unknown,
        }
    }
}

/// Attachment embedded in a package (whole-package transfer path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub field_name: String,
    pub file_name: String,
    /// Base64 (standard alphabet) file content
    pub file_data: String,
    #[serde(default)]
    pub file_type: FileType,
    pub relative_path: String,
}

impl FileAttachment {
    pub fn encode_data(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    pub fn decode_data(&self) -> Result<Vec<u8>> {
        STANDARD.decode(self.file_data.as_bytes()).map_err(|error| {
            Error::Attachment(format!("{}: invalid base64 data: {error}", self.file_name))
        })
    }
}

/// Per-file header for the chunked streaming path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u32,
    /// Wire entity type name; unknown names are accepted and land in the fallback directory
    pub entity_type: String,
    pub entity_id: i64,
    #[serde(default)]
    pub file_type: FileType,
    #[serde(default)]
    pub original_path: String,
    /// Hex SHA-256 of the whole file, empty when not computed
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub last_modified: i64,
}

impl FileMetadata {
    /// Transfer key: `entityId_fileName`.
    pub fn file_id(&self) -> String {
        format!("{}_{}", self.entity_id, self.file_name)
    }
}

/// Top-level envelope for one peer exchange or one exported backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPackage {
    pub device_id: String,
    pub timestamp: i64,
    pub entities: SyncEntities,
    #[serde(default)]
    pub file_attachments: Vec<FileAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_metadata: Option<Vec<FileMetadata>>,
}

impl SyncPackage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
