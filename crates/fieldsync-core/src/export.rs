//! Whole-package export and import
//!
//! A package is a full snapshot of the store with every referenced file
//! embedded inline, written as pretty JSON. Importing reads it back, writes the
//! attachments under the local storage root and merges the records.

use std::path::Path;

use chrono::{TimeZone, Utc};

use crate::attachments::{
    apply_attachments, collect_attachments, relativize_paths, AttachmentReport, StorageLayout,
};
use crate::error::{Error, Result};
use crate::merge::{merge, MergeReport, MergeStrategy};
use crate::models::{
    ControlPoint, DetailedEquipment, EntityList, Equipment, Event, Node, Pku, Remark, Section,
    SyncEntities, SyncPackage, Tube,
};
use crate::store::{load_entities, LocalStore};
use crate::util::now_millis;

/// Prefix of exported package file names
pub const EXPORT_FILE_PREFIX: &str = "fieldsync-export";

/// Options for building a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    /// Embed referenced files as base64 attachments
    pub include_attachments: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_attachments: true,
        }
    }
}

fn restamp_list<T: EntityList>(entities: &mut SyncEntities, timestamp: i64, device_id: &str) {
    for record in T::list_mut(entities) {
        *record = record.restamped(timestamp, device_id);
    }
}

/// Stamp every snapshot with the build time and the producing device.
pub fn restamp(entities: &mut SyncEntities, timestamp: i64, device_id: &str) {
    restamp_list::<ControlPoint>(entities, timestamp, device_id);
    restamp_list::<Pku>(entities, timestamp, device_id);
    restamp_list::<Tube>(entities, timestamp, device_id);
    restamp_list::<Section>(entities, timestamp, device_id);
    restamp_list::<Node>(entities, timestamp, device_id);
    restamp_list::<Equipment>(entities, timestamp, device_id);
    restamp_list::<DetailedEquipment>(entities, timestamp, device_id);
    restamp_list::<Remark>(entities, timestamp, device_id);
    restamp_list::<Event>(entities, timestamp, device_id);
}

/// Turn stored records into a package ready to send or save.
pub async fn build_package(
    mut entities: SyncEntities,
    layout: &StorageLayout,
    device_id: &str,
    options: ExportOptions,
) -> SyncPackage {
    let timestamp = now_millis();
    restamp(&mut entities, timestamp, device_id);
    let file_attachments = if options.include_attachments {
        collect_attachments(&entities, layout).await
    } else {
        Vec::new()
    };
    relativize_paths(&mut entities, layout);

    SyncPackage {
        device_id: device_id.to_string(),
        timestamp,
        entities,
        file_attachments,
        file_metadata: None,
    }
}

/// Suggested file name for a package built at `timestamp` (Unix ms).
pub fn export_file_name(timestamp: i64) -> String {
    let stamp = Utc
        .timestamp_millis_opt(timestamp)
        .single()
        .map_or_else(|| timestamp.to_string(), |time| time.format("%Y%m%d-%H%M%S").to_string());
    format!("{EXPORT_FILE_PREFIX}-{stamp}.json")
}

/// Export the whole store to `path`.
pub async fn export_package<S: LocalStore>(
    store: &S,
    layout: &StorageLayout,
    device_id: &str,
    path: &Path,
    options: ExportOptions,
) -> Result<SyncPackage> {
    let entities = load_entities(store)?;
    let package = build_package(entities, layout, device_id, options).await;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, package.to_json()?).await?;
    tracing::info!(
        path = %path.display(),
        records = package.entities.total(),
        attachments = package.file_attachments.len(),
        "Exported package"
    );
    Ok(package)
}

/// Read a package file.
pub async fn import_package(path: &Path) -> Result<SyncPackage> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|error| {
        Error::InvalidInput(format!("Cannot read package {}: {error}", path.display()))
    })?;
    SyncPackage::from_json(&raw)
}

/// Write a package's attachments and merge its records into `store`.
pub async fn apply_package<S: LocalStore>(
    store: &S,
    package: SyncPackage,
    layout: &StorageLayout,
    strategy: MergeStrategy,
) -> Result<(MergeReport, AttachmentReport)> {
    let SyncPackage {
        mut entities,
        file_attachments,
        device_id,
        ..
    } = package;
    let attachments = apply_attachments(&mut entities, &file_attachments, layout).await;
    let report = merge(store, &entities, strategy)?;
    tracing::info!(
        origin = %device_id,
        written = attachments.written,
        skipped = attachments.skipped,
        "Applied package"
    );
    Ok((report, attachments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntitySnapshot, EntityType, PhotoPaths};
    use crate::store::{MemoryStore, SqliteStore};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn seed(store: &impl LocalStore, photo: &str) {
        store
            .insert(&EntitySnapshot::new(
                ControlPoint {
                    id: 1,
                    name: "KP1".to_string(),
                    ..Default::default()
                },
                10,
                "a",
            ))
            .unwrap();
        store
            .insert(&EntitySnapshot::new(
                Remark {
                    id: 2,
                    control_point_id: 1,
                    text: "Crack".to_string(),
                    photos: PhotoPaths::parse(photo),
                    ..Default::default()
                },
                10,
                "a",
            ))
            .unwrap();
    }

    #[test]
    fn file_name_uses_utc_timestamp() {
        assert_eq!(
            export_file_name(1_700_000_000_000),
            "fieldsync-export-20231114-221320.json"
        );
    }

    #[tokio::test]
    async fn export_then_import_into_fresh_device() {
        let source_dir = tempdir().unwrap();
        let source_layout = StorageLayout::new(source_dir.path());
        source_layout.ensure_dirs().unwrap();
        let photo = source_dir.path().join("remarks").join("crack.jpg");
        std::fs::write(&photo, b"crack-photo").unwrap();

        let source = SqliteStore::open_in_memory().unwrap();
        seed(&source, &photo.display().to_string());

        let out = source_dir.path().join("out").join(export_file_name(0));
        let package = export_package(&source, &source_layout, "tablet-a", &out, ExportOptions::default())
            .await
            .unwrap();
        assert_eq!(package.file_attachments.len(), 1);
        let exported: Vec<&String> = package.entities.remarks[0].entity.photos.iter().collect();
        assert_eq!(exported, vec!["remarks/crack.jpg"]);
        assert_eq!(package.entities.remarks[0].origin_device, "tablet-a");

        let target_dir = tempdir().unwrap();
        let target_layout = StorageLayout::new(target_dir.path());
        let target = MemoryStore::new();
        let imported = import_package(&out).await.unwrap();
        assert_eq!(imported, package);

        let (report, attachments) =
            apply_package(&target, imported, &target_layout, MergeStrategy::Unvalidated)
                .await
                .unwrap();
        assert_eq!(attachments.written, 1);
        assert_eq!(report.counts_for(EntityType::Remark).added, 1);
        assert_eq!(
            std::fs::read(target_dir.path().join("remarks/crack.jpg")).unwrap(),
            b"crack-photo".to_vec()
        );
        let stored = target.get_by_id::<Remark>(2).unwrap().unwrap();
        assert_eq!(stored.entity.photos.len(), 1);
    }

    #[tokio::test]
    async fn export_without_attachments_keeps_paths() {
        let dir = tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        let store = MemoryStore::new();
        seed(&store, "remarks/missing.jpg");
        let entities = load_entities(&store).unwrap();
        let package = build_package(
            entities,
            &layout,
            "tablet-a",
            ExportOptions {
                include_attachments: false,
            },
        )
        .await;
        assert!(package.file_attachments.is_empty());
        assert_eq!(package.entities.remarks[0].entity.photos.len(), 1);
    }

    #[tokio::test]
    async fn unreadable_package_is_invalid_input() {
        let dir = tempdir().unwrap();
        let error = import_package(&dir.path().join("nope.json")).await.unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }
}
