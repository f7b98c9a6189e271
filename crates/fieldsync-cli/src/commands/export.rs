use std::path::{Path, PathBuf};

use fieldsync_core::attachments::StorageLayout;
use fieldsync_core::export::{export_file_name, export_package, ExportOptions};
use fieldsync_core::SyncConfig;

use crate::commands::common::open_store;
use crate::error::CliError;

pub async fn run_export(
    config: &SyncConfig,
    output_path: Option<&Path>,
    no_attachments: bool,
) -> Result<(), CliError> {
    let store = open_store(config)?;
    let layout = StorageLayout::new(&config.storage_root);
    let path = output_path.map_or_else(
        || PathBuf::from(export_file_name(chrono::Utc::now().timestamp_millis())),
        Path::to_path_buf,
    );
    let options = ExportOptions {
        include_attachments: !no_attachments,
    };

    let package = export_package(&store, &layout, &config.device_id, &path, options).await?;
    println!(
        "Exported {} records and {} attachments to {}",
        package.entities.total(),
        package.file_attachments.len(),
        path.display()
    );
    Ok(())
}
