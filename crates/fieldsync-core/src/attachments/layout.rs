//! On-disk layout of the private storage root

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::models::EntityType;

/// Directory under the root that holds files being assembled
const INCOMING_DIR: &str = ".incoming";

/// Private storage root with one directory per entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn type_dir(&self, entity_type: EntityType) -> PathBuf {
        self.root.join(entity_type.directory_name())
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join(INCOMING_DIR)
    }

    /// Final location for a received file: absolute path and root-relative path.
    ///
    /// Unknown entity type names land in the fallback directory.
    pub fn target_for(&self, entity_type: &str, file_name: &str) -> Result<(PathBuf, String)> {
        let mut components = Path::new(file_name).components();
        let is_plain_name = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !is_plain_name {
            return Err(Error::Attachment(format!("invalid file name: {file_name:?}")));
        }
        let directory = EntityType::directory_for(entity_type);
        Ok((
            self.root.join(directory).join(file_name),
            format!("{directory}/{file_name}"),
        ))
    }

    /// Rewrite a stored path relative to the root, with `/` separators.
    ///
    /// Paths outside the root and already-relative paths are returned unchanged.
    pub fn relativize(&self, path: &str) -> String {
        let candidate = Path::new(path);
        if !candidate.is_absolute() {
            return path.to_string();
        }
        candidate.strip_prefix(&self.root).map_or_else(
            |_| path.to_string(),
            |relative| {
                relative
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            },
        )
    }

    /// Absolute location of a stored path.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }

    /// Create the root and every type directory.
    pub fn ensure_dirs(&self) -> Result<()> {
        for entity_type in crate::models::MERGE_ORDER {
            std::fs::create_dir_all(self.type_dir(entity_type))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relativize_strips_the_root() {
        let layout = StorageLayout::new("/data/app");
        assert_eq!(layout.relativize("/data/app/remarks/leak.jpg"), "remarks/leak.jpg");
        assert_eq!(layout.relativize("remarks/leak.jpg"), "remarks/leak.jpg");
        assert_eq!(layout.relativize("/sdcard/leak.jpg"), "/sdcard/leak.jpg");
    }

    #[test]
    fn resolve_reroots_relative_paths() {
        let layout = StorageLayout::new("/data/other");
        assert_eq!(
            layout.resolve("remarks/leak.jpg"),
            PathBuf::from("/data/other/remarks/leak.jpg")
        );
    }

    #[test]
    fn target_rejects_path_traversal() {
        let layout = StorageLayout::new("/data/app");
        assert!(layout.target_for("remark", "../../etc/passwd").is_err());
        assert!(layout.target_for("remark", "").is_err());
        let (path, relative) = layout.target_for("detailed_equipment", "plate.jpg").unwrap();
        assert_eq!(relative, "detailed_equipment/plate.jpg");
        assert_eq!(path, PathBuf::from("/data/app/detailed_equipment/plate.jpg"));
    }
}
