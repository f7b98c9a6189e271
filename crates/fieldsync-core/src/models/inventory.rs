//! Inspection inventory records
//!
//! Parent/child links: `ControlPoint -> {Pku, Tube, Remark, Event}`,
//! `Pku -> Section`, `Tube -> Node`, `{Node, Section} -> {Equipment, DetailedEquipment}`.

use serde::{Deserialize, Serialize};

use super::entity::weight;
use super::{EntityType, ParentRef, PhotoPaths, SyncEntity};
use crate::util::is_present;

/// Wire name of the default photo field.
pub const PHOTOS_FIELD: &str = "photos";
/// Wire name of the nameplate photo field on detailed equipment.
pub const NAMEPLATE_PHOTOS_FIELD: &str = "nameplatePhotos";

/// Remark priority values treated as high priority.
const HIGH_PRIORITY_VALUES: [&str; 2] = ["Высокий", "High"];

/// Root of the hierarchy: an inspected site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPoint {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub photos: PhotoPaths,
}

/// Distribution cabinet located at a control point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pku {
    pub id: i64,
    pub control_point_id: i64,
    pub name: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub photos: PhotoPaths,
}

/// Pipe run located at a control point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tube {
    pub id: i64,
    pub control_point_id: i64,
    pub name: String,
    #[serde(default)]
    pub diameter_mm: Option<i32>,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub photos: PhotoPaths,
}

/// Section of a PKU cabinet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: i64,
    pub pku_id: i64,
    pub name: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub photos: PhotoPaths,
}

/// Node on a tube.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: i64,
    pub tube_id: i64,
    pub name: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub photos: PhotoPaths,
}

/// Equipment mounted on a node or in a section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Equipment {
    pub id: i64,
    #[serde(default)]
    pub node_id: Option<i64>,
    #[serde(default)]
    pub section_id: Option<i64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub photos: PhotoPaths,
}

/// Equipment with full passport data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedEquipment {
    pub id: i64,
    #[serde(default)]
    pub node_id: Option<i64>,
    #[serde(default)]
    pub section_id: Option<i64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub equipment_type: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub inventory_number: Option<String>,
    #[serde(default)]
    pub photos: PhotoPaths,
    #[serde(default)]
    pub nameplate_photos: PhotoPaths,
}

/// Inspector remark attached to a control point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Remark {
    pub id: i64,
    pub control_point_id: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub photos: PhotoPaths,
}

impl Remark {
    pub fn is_high_priority(&self) -> bool {
        let priority = self.priority.trim();
        HIGH_PRIORITY_VALUES
            .iter()
            .any(|value| value.to_lowercase() == priority.to_lowercase())
    }
}

/// Scheduled or completed maintenance event at a control point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i64,
    pub control_point_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub event_date: Option<String>,
    #[serde(default)]
    pub is_completed: bool,
}

fn text(value: &str) -> bool {
    !value.trim().is_empty()
}

fn optional(value: Option<&String>) -> bool {
    is_present(value.map(String::as_str))
}

fn equipment_parents(node_id: Option<i64>, section_id: Option<i64>) -> Vec<ParentRef> {
    node_id
        .map(|id| ParentRef::new(EntityType::Node, id))
        .into_iter()
        .chain(section_id.map(|id| ParentRef::new(EntityType::Section, id)))
        .collect()
}

impl SyncEntity for ControlPoint {
    const ENTITY_TYPE: EntityType = EntityType::ControlPoint;

    fn id(&self) -> i64 {
        self.id
    }

    fn parents(&self) -> Vec<ParentRef> {
        Vec::new()
    }

    fn completeness_score(&self) -> u32 {
        weight(text(&self.name), 20)
            + weight(optional(self.address.as_ref()), 15)
            + weight(optional(self.description.as_ref()), 10)
            + weight(!self.photos.is_empty(), 10)
    }

    fn photo_fields(&self) -> Vec<(&'static str, &PhotoPaths)> {
        vec![(PHOTOS_FIELD, &self.photos)]
    }

    fn photo_field_mut(&mut self, field: &str) -> Option<&mut PhotoPaths> {
        (field == PHOTOS_FIELD).then_some(&mut self.photos)
    }
}

impl SyncEntity for Pku {
    const ENTITY_TYPE: EntityType = EntityType::Pku;

    fn id(&self) -> i64 {
        self.id
    }

    fn parents(&self) -> Vec<ParentRef> {
        vec![ParentRef::new(EntityType::ControlPoint, self.control_point_id)]
    }

    fn completeness_score(&self) -> u32 {
        weight(text(&self.name), 20)
            + weight(optional(self.kind.as_ref()), 15)
            + weight(optional(self.location.as_ref()), 10)
            + weight(optional(self.description.as_ref()), 10)
            + weight(!self.photos.is_empty(), 10)
    }

    fn photo_fields(&self) -> Vec<(&'static str, &PhotoPaths)> {
        vec![(PHOTOS_FIELD, &self.photos)]
    }

    fn photo_field_mut(&mut self, field: &str) -> Option<&mut PhotoPaths> {
        (field == PHOTOS_FIELD).then_some(&mut self.photos)
    }
}

impl SyncEntity for Tube {
    const ENTITY_TYPE: EntityType = EntityType::Tube;

    fn id(&self) -> i64 {
        self.id
    }

    fn parents(&self) -> Vec<ParentRef> {
        vec![ParentRef::new(EntityType::ControlPoint, self.control_point_id)]
    }

    fn completeness_score(&self) -> u32 {
        weight(text(&self.name), 20)
            + weight(self.diameter_mm.is_some(), 15)
            + weight(optional(self.material.as_ref()), 15)
            + weight(optional(self.description.as_ref()), 10)
            + weight(!self.photos.is_empty(), 10)
    }

    fn photo_fields(&self) -> Vec<(&'static str, &PhotoPaths)> {
        vec![(PHOTOS_FIELD, &self.photos)]
    }

    fn photo_field_mut(&mut self, field: &str) -> Option<&mut PhotoPaths> {
        (field == PHOTOS_FIELD).then_some(&mut self.photos)
    }
}

impl SyncEntity for Section {
    const ENTITY_TYPE: EntityType = EntityType::Section;

    fn id(&self) -> i64 {
        self.id
    }

    fn parents(&self) -> Vec<ParentRef> {
        vec![ParentRef::new(EntityType::Pku, self.pku_id)]
    }

    fn completeness_score(&self) -> u32 {
        weight(text(&self.name), 20)
            + weight(optional(self.number.as_ref()), 15)
            + weight(optional(self.description.as_ref()), 10)
            + weight(!self.photos.is_empty(), 10)
    }

    fn photo_fields(&self) -> Vec<(&'static str, &PhotoPaths)> {
        vec![(PHOTOS_FIELD, &self.photos)]
    }

    fn photo_field_mut(&mut self, field: &str) -> Option<&mut PhotoPaths> {
        (field == PHOTOS_FIELD).then_some(&mut self.photos)
    }
}

impl SyncEntity for Node {
    const ENTITY_TYPE: EntityType = EntityType::Node;

    fn id(&self) -> i64 {
        self.id
    }

    fn parents(&self) -> Vec<ParentRef> {
        vec![ParentRef::new(EntityType::Tube, self.tube_id)]
    }

    fn completeness_score(&self) -> u32 {
        weight(text(&self.name), 20)
            + weight(optional(self.number.as_ref()), 15)
            + weight(optional(self.description.as_ref()), 10)
            + weight(!self.photos.is_empty(), 10)
    }

    fn photo_fields(&self) -> Vec<(&'static str, &PhotoPaths)> {
        vec![(PHOTOS_FIELD, &self.photos)]
    }

    fn photo_field_mut(&mut self, field: &str) -> Option<&mut PhotoPaths> {
        (field == PHOTOS_FIELD).then_some(&mut self.photos)
    }
}

impl SyncEntity for Equipment {
    const ENTITY_TYPE: EntityType = EntityType::Equipment;

    fn id(&self) -> i64 {
        self.id
    }

    fn parents(&self) -> Vec<ParentRef> {
        equipment_parents(self.node_id, self.section_id)
    }

    fn completeness_score(&self) -> u32 {
        weight(text(&self.name), 20)
            + weight(optional(self.model.as_ref()), 15)
            + weight(optional(self.serial_number.as_ref()), 15)
            + weight(!self.photos.is_empty(), 10)
            + weight(optional(self.description.as_ref()), 5)
    }

    fn photo_fields(&self) -> Vec<(&'static str, &PhotoPaths)> {
        vec![(PHOTOS_FIELD, &self.photos)]
    }

    fn photo_field_mut(&mut self, field: &str) -> Option<&mut PhotoPaths> {
        (field == PHOTOS_FIELD).then_some(&mut self.photos)
    }
}

impl SyncEntity for DetailedEquipment {
    const ENTITY_TYPE: EntityType = EntityType::DetailedEquipment;

    fn id(&self) -> i64 {
        self.id
    }

    fn parents(&self) -> Vec<ParentRef> {
        equipment_parents(self.node_id, self.section_id)
    }

    fn completeness_score(&self) -> u32 {
        weight(text(&self.name), 20)
            + weight(optional(self.equipment_type.as_ref()), 10)
            + weight(optional(self.manufacturer.as_ref()), 10)
            + weight(optional(self.model.as_ref()), 15)
            + weight(optional(self.serial_number.as_ref()), 15)
            + weight(optional(self.inventory_number.as_ref()), 10)
            + weight(!self.photos.is_empty(), 10)
            + weight(!self.nameplate_photos.is_empty(), 5)
    }

    fn photo_fields(&self) -> Vec<(&'static str, &PhotoPaths)> {
        vec![
            (PHOTOS_FIELD, &self.photos),
            (NAMEPLATE_PHOTOS_FIELD, &self.nameplate_photos),
        ]
    }

    fn photo_field_mut(&mut self, field: &str) -> Option<&mut PhotoPaths> {
        match field {
            PHOTOS_FIELD => Some(&mut self.photos),
            NAMEPLATE_PHOTOS_FIELD => Some(&mut self.nameplate_photos),
            _ => None,
        }
    }
}

impl SyncEntity for Remark {
    const ENTITY_TYPE: EntityType = EntityType::Remark;

    fn id(&self) -> i64 {
        self.id
    }

    fn parents(&self) -> Vec<ParentRef> {
        vec![ParentRef::new(EntityType::ControlPoint, self.control_point_id)]
    }

    fn completeness_score(&self) -> u32 {
        weight(text(&self.text), 20)
            + weight(text(&self.priority), 5)
            + weight(optional(self.status.as_ref()), 10)
            + weight(!self.photos.is_empty(), 10)
    }

    fn override_flag(&self) -> Option<bool> {
        Some(self.is_high_priority())
    }

    fn photo_fields(&self) -> Vec<(&'static str, &PhotoPaths)> {
        vec![(PHOTOS_FIELD, &self.photos)]
    }

    fn photo_field_mut(&mut self, field: &str) -> Option<&mut PhotoPaths> {
        (field == PHOTOS_FIELD).then_some(&mut self.photos)
    }
}

impl SyncEntity for Event {
    const ENTITY_TYPE: EntityType = EntityType::Event;

    fn id(&self) -> i64 {
        self.id
    }

    fn parents(&self) -> Vec<ParentRef> {
        vec![ParentRef::new(EntityType::ControlPoint, self.control_point_id)]
    }

    fn completeness_score(&self) -> u32 {
        weight(text(&self.title), 20)
            + weight(optional(self.description.as_ref()), 15)
            + weight(optional(self.event_date.as_ref()), 10)
    }

    fn override_flag(&self) -> Option<bool> {
        Some(self.is_completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equipment_score_uses_documented_weights() {
        let mut equipment = Equipment {
            id: 1,
            node_id: Some(2),
            name: "Pump".to_string(),
            ..Default::default()
        };
        assert_eq!(equipment.completeness_score(), 20);

        equipment.model = Some("K-80".to_string());
        equipment.serial_number = Some("SN-1".to_string());
        equipment.photos.push("equipment/pump.jpg");
        assert_eq!(equipment.completeness_score(), 60);

        equipment.model = Some("   ".to_string());
        assert_eq!(equipment.completeness_score(), 45);
    }

    #[test]
    fn equipment_parents_cover_node_and_section() {
        let equipment = Equipment {
            id: 1,
            node_id: Some(2),
            section_id: Some(3),
            ..Default::default()
        };
        assert_eq!(
            equipment.parents(),
            vec![
                ParentRef::new(EntityType::Node, 2),
                ParentRef::new(EntityType::Section, 3)
            ]
        );
        assert!(Equipment::default().parents().is_empty());
    }

    #[test]
    fn remark_priority_accepts_localized_and_english_values() {
        let mut remark = Remark {
            priority: "Высокий".to_string(),
            ..Default::default()
        };
        assert_eq!(remark.override_flag(), Some(true));
        remark.priority = "high".to_string();
        assert!(remark.is_high_priority());
        remark.priority = "Средний".to_string();
        assert_eq!(remark.override_flag(), Some(false));
    }

    #[test]
    fn detailed_equipment_exposes_both_photo_fields() {
        let mut equipment = DetailedEquipment::default();
        equipment
            .photo_field_mut(NAMEPLATE_PHOTOS_FIELD)
            .unwrap()
            .push("detailed_equipment/plate.jpg");
        assert_eq!(equipment.nameplate_photos.len(), 1);
        assert!(equipment.photo_field_mut("unknown").is_none());
    }

    #[test]
    fn decodes_camel_case_wire_fields() {
        let pku: Pku = serde_json::from_str(
            r#"{"id":5,"controlPointId":1,"name":"PKU-A","photos":"pkus/a.jpg"}"#,
        )
        .unwrap();
        assert_eq!(pku.control_point_id, 1);
        assert_eq!(pku.photos.len(), 1);
    }
}
