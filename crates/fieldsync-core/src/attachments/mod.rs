//! Attachment reconciliation
//!
//! Before sending, photo paths are rewritten relative to the storage root so
//! the receiver can re-root them. Inline attachments carry the file bytes as
//! base64; on receipt each one is written into its type directory and the new
//! relative path is appended to the matching record's photo field before the
//! merge. Streamed files arrive after their records were merged, so the stored
//! record is relinked in place once the file lands. Individual attachment
//! failures are logged and skipped.

mod layout;

pub use layout::StorageLayout;

use crate::error::{Error, Result};
use crate::models::{
    ControlPoint, DetailedEquipment, EntityList, EntityType, Equipment, Event, FileAttachment,
    FileType, Node, Pku, Remark, Section, SyncEntities, SyncEntity, Tube,
};
use crate::store::LocalStore;
use crate::transfer::FileTask;

/// One photo path referenced by a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRef {
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub field_name: &'static str,
    pub path: String,
}

/// Outcome of applying a batch of inline attachments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachmentReport {
    pub written: usize,
    pub skipped: usize,
}

fn refs_of<T: EntityList>(entities: &SyncEntities, out: &mut Vec<PhotoRef>) {
    for record in T::list(entities) {
        for (field_name, paths) in record.entity.photo_fields() {
            out.extend(paths.iter().map(|path| PhotoRef {
                entity_type: T::ENTITY_TYPE,
                entity_id: record.id(),
                field_name,
                path: path.clone(),
            }));
        }
    }
}

/// Every photo path referenced by a batch, in merge order.
pub fn photo_refs(entities: &SyncEntities) -> Vec<PhotoRef> {
    let mut refs = Vec::new();
    refs_of::<ControlPoint>(entities, &mut refs);
    refs_of::<Pku>(entities, &mut refs);
    refs_of::<Tube>(entities, &mut refs);
    refs_of::<Section>(entities, &mut refs);
    refs_of::<Node>(entities, &mut refs);
    refs_of::<Equipment>(entities, &mut refs);
    refs_of::<DetailedEquipment>(entities, &mut refs);
    refs_of::<Remark>(entities, &mut refs);
    refs_of::<Event>(entities, &mut refs);
    refs
}

fn rewrite_of<T: EntityList>(entities: &mut SyncEntities, layout: &StorageLayout) {
    for record in T::list_mut(entities) {
        let fields: Vec<&'static str> = record
            .entity
            .photo_fields()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        for field in fields {
            if let Some(paths) = record.entity.photo_field_mut(field) {
                for path in paths.iter_mut() {
                    *path = layout.relativize(path);
                }
            }
        }
    }
}

/// Rewrite every stored photo path relative to the storage root.
pub fn relativize_paths(entities: &mut SyncEntities, layout: &StorageLayout) {
    rewrite_of::<ControlPoint>(entities, layout);
    rewrite_of::<Pku>(entities, layout);
    rewrite_of::<Tube>(entities, layout);
    rewrite_of::<Section>(entities, layout);
    rewrite_of::<Node>(entities, layout);
    rewrite_of::<Equipment>(entities, layout);
    rewrite_of::<DetailedEquipment>(entities, layout);
    rewrite_of::<Remark>(entities, layout);
    rewrite_of::<Event>(entities, layout);
}

fn append_to<T: EntityList>(
    entities: &mut SyncEntities,
    entity_id: i64,
    field_name: &str,
    relative_path: &str,
) -> bool {
    let field = T::list_mut(entities)
        .iter_mut()
        .find(|record| record.id() == entity_id)
        .and_then(|record| record.entity.photo_field_mut(field_name));
    match field {
        Some(paths) => {
            paths.push(relative_path);
            true
        }
        None => false,
    }
}

/// Append a path to the photo field of the record matched by type, id and field.
pub fn append_photo(
    entities: &mut SyncEntities,
    entity_type: EntityType,
    entity_id: i64,
    field_name: &str,
    relative_path: &str,
) -> bool {
    match entity_type {
        EntityType::ControlPoint => {
            append_to::<ControlPoint>(entities, entity_id, field_name, relative_path)
        }
        EntityType::Pku => append_to::<Pku>(entities, entity_id, field_name, relative_path),
        EntityType::Tube => append_to::<Tube>(entities, entity_id, field_name, relative_path),
        EntityType::Section => append_to::<Section>(entities, entity_id, field_name, relative_path),
        EntityType::Node => append_to::<Node>(entities, entity_id, field_name, relative_path),
        EntityType::Equipment => {
            append_to::<Equipment>(entities, entity_id, field_name, relative_path)
        }
        EntityType::DetailedEquipment => {
            append_to::<DetailedEquipment>(entities, entity_id, field_name, relative_path)
        }
        EntityType::Remark => append_to::<Remark>(entities, entity_id, field_name, relative_path),
        EntityType::Event => append_to::<Event>(entities, entity_id, field_name, relative_path),
    }
}

fn relink_in<T: SyncEntity, S: LocalStore>(
    store: &S,
    entity_id: i64,
    original_path: &str,
    relative_path: &str,
) -> Result<bool> {
    let Some(mut record) = store.get_by_id::<T>(entity_id)? else {
        return Ok(false);
    };
    let fields: Vec<&'static str> = record
        .entity
        .photo_fields()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    let mut referenced = false;
    let mut changed = false;
    for field in fields {
        let Some(paths) = record.entity.photo_field_mut(field) else {
            continue;
        };
        for path in paths.iter_mut().filter(|path| path.as_str() == original_path) {
            referenced = true;
            if path != relative_path {
                *path = relative_path.to_string();
                changed = true;
            }
        }
    }
    if changed {
        store.update(&record)?;
    }
    Ok(referenced)
}

/// Point a stored record at a streamed file's final location.
///
/// The record is found by type and id, and every photo path equal to the
/// sender's `original_path` is replaced with `relative_path`. Returns `false`
/// when no such record references the file.
pub fn relink_received_file<S: LocalStore>(
    store: &S,
    entity_type: EntityType,
    entity_id: i64,
    original_path: &str,
    relative_path: &str,
) -> Result<bool> {
    let (original, relative) = (original_path, relative_path);
    match entity_type {
        EntityType::ControlPoint => relink_in::<ControlPoint, S>(store, entity_id, original, relative),
        EntityType::Pku => relink_in::<Pku, S>(store, entity_id, original, relative),
        EntityType::Tube => relink_in::<Tube, S>(store, entity_id, original, relative),
        EntityType::Section => relink_in::<Section, S>(store, entity_id, original, relative),
        EntityType::Node => relink_in::<Node, S>(store, entity_id, original, relative),
        EntityType::Equipment => relink_in::<Equipment, S>(store, entity_id, original, relative),
        EntityType::DetailedEquipment => {
            relink_in::<DetailedEquipment, S>(store, entity_id, original, relative)
        }
        EntityType::Remark => relink_in::<Remark, S>(store, entity_id, original, relative),
        EntityType::Event => relink_in::<Event, S>(store, entity_id, original, relative),
    }
}

fn file_name_of(path: &str) -> Option<String> {
    std::path::Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
}

/// Read every referenced file into an inline attachment.
///
/// Missing, unreadable or empty files are dropped.
pub async fn collect_attachments(
    entities: &SyncEntities,
    layout: &StorageLayout,
) -> Vec<FileAttachment> {
    let mut attachments = Vec::new();
    for photo in photo_refs(entities) {
        let source = layout.resolve(&photo.path);
        let Some(file_name) = file_name_of(&photo.path) else {
            continue;
        };
        let bytes = match tokio::fs::read(&source).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                tracing::debug!(path = %source.display(), "Skipping empty attachment");
                continue;
            }
            Err(error) => {
                tracing::debug!(path = %source.display(), "Skipping attachment: {error}");
                continue;
            }
        };
        attachments.push(FileAttachment {
            entity_type: photo.entity_type,
            entity_id: photo.entity_id,
            field_name: photo.field_name.to_string(),
            file_type: FileType::from_path(&source),
            file_name,
            file_data: FileAttachment::encode_data(&bytes),
            relative_path: layout.relativize(&photo.path),
        });
    }
    attachments
}

/// Streaming tasks for every referenced file that exists and is non-empty.
pub async fn collect_file_tasks(
    entities: &SyncEntities,
    layout: &StorageLayout,
    peer_id: &str,
) -> Vec<FileTask> {
    let mut tasks: Vec<FileTask> = Vec::new();
    for photo in photo_refs(entities) {
        let path = layout.resolve(&photo.path);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            _ => {
                tracing::debug!(path = %path.display(), "Skipping missing file");
                continue;
            }
        }
        if tasks.iter().any(|task| task.path == path) {
            continue;
        }
        tasks.push(FileTask {
            peer_id: peer_id.to_string(),
            path,
            entity_type: photo.entity_type.as_str().to_string(),
            entity_id: photo.entity_id,
            original_path: layout.relativize(&photo.path),
        });
    }
    tasks
}

async fn write_attachment(attachment: &FileAttachment, layout: &StorageLayout) -> Result<String> {
    let bytes = attachment.decode_data()?;
    let (path, relative_path) =
        layout.target_for(attachment.entity_type.as_str(), &attachment.file_name)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|error| Error::Attachment(format!("{}: {error}", path.display())))?;
    Ok(relative_path)
}

/// Write inline attachments and link them into the incoming records.
pub async fn apply_attachments(
    entities: &mut SyncEntities,
    attachments: &[FileAttachment],
    layout: &StorageLayout,
) -> AttachmentReport {
    let mut report = AttachmentReport::default();
    for attachment in attachments {
        match write_attachment(attachment, layout).await {
            Ok(relative_path) => {
                report.written += 1;
                let linked = append_photo(
                    entities,
                    attachment.entity_type,
                    attachment.entity_id,
                    &attachment.field_name,
                    &relative_path,
                );
                if !linked {
                    tracing::warn!(
                        entity_type = %attachment.entity_type,
                        entity_id = attachment.entity_id,
                        field = %attachment.field_name,
                        "Attachment has no matching record field"
                    );
                }
            }
            Err(error) => {
                report.skipped += 1;
                tracing::warn!(
                    file = %attachment.file_name,
                    entity_type = %attachment.entity_type,
                    entity_id = attachment.entity_id,
                    "Skipping attachment: {error}"
                );
            }
        }
    }
    report
}
