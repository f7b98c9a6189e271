//! Entity type tags and the fixed parent-before-child order

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// The nine business record types of the inspection inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    ControlPoint,
    Pku,
    Tube,
    Section,
    Node,
    Equipment,
    DetailedEquipment,
    Remark,
    Event,
}

/// Topological merge order: every parent type precedes its children.
pub const MERGE_ORDER: [EntityType; 9] = [
    EntityType::ControlPoint,
    EntityType::Pku,
    EntityType::Tube,
    EntityType::Section,
    EntityType::Node,
    EntityType::Equipment,
    EntityType::DetailedEquipment,
    EntityType::Remark,
    EntityType::Event,
];

/// Directory used for files whose entity type is not recognized.
pub const FALLBACK_DIRECTORY: &str = "files";

impl EntityType {
    /// Wire name of this type (`"detailed_equipment"`, ...).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ControlPoint => "control_point",
            Self::Pku => "pku",
            Self::Tube => "tube",
            Self::Section => "section",
            Self::Node => "node",
            Self::Equipment => "equipment",
            Self::DetailedEquipment => "detailed_equipment",
            Self::Remark => "remark",
            Self::Event => "event",
        }
    }

    /// Storage directory (relative to the storage root) for this type's files.
    pub const fn directory_name(self) -> &'static str {
        match self {
            Self::ControlPoint => "control_points",
            Self::Pku => "pkus",
            Self::Tube => "tubes",
            Self::Section => "sections",
            Self::Node => "nodes",
            Self::Equipment => "equipment",
            Self::DetailedEquipment => "detailed_equipment",
            Self::Remark => "remarks",
            Self::Event => "events",
        }
    }

    /// Store table name for this type.
    pub const fn table_name(self) -> &'static str {
        match self {
            Self::ControlPoint => "control_points",
            Self::Pku => "pkus",
            Self::Tube => "tubes",
            Self::Section => "sections",
            Self::Node => "nodes",
            Self::Equipment => "equipment",
            Self::DetailedEquipment => "detailed_equipment",
            Self::Remark => "remarks",
            Self::Event => "events",
        }
    }

    /// Directory for a possibly unknown wire type name.
    pub fn directory_for(raw: &str) -> &'static str {
        raw.parse::<Self>()
            .map_or(FALLBACK_DIRECTORY, Self::directory_name)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        MERGE_ORDER
            .into_iter()
            .find(|entity_type| entity_type.as_str() == normalized)
            .or_else(|| match normalized.as_str() {
                "controlpoint" => Some(Self::ControlPoint),
                "detailedequipment" => Some(Self::DetailedEquipment),
                _ => None,
            })
            .ok_or_else(|| Error::InvalidInput(format!("Unknown entity type: {s}")))
    }
}
