use std::path::Path;

use fieldsync_core::attachments::StorageLayout;
use fieldsync_core::export::{apply_package, import_package};
use fieldsync_core::{MergeStrategy, SyncConfig};

use crate::commands::common::{open_store, print_report};
use crate::error::CliError;

pub async fn run_import(
    config: &SyncConfig,
    path: &Path,
    validated: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let package = import_package(path).await?;
    let store = open_store(config)?;
    let layout = StorageLayout::new(&config.storage_root);
    let strategy = if validated {
        MergeStrategy::Validated
    } else {
        MergeStrategy::Unvalidated
    };

    let (report, attachments) = apply_package(&store, package, &layout, strategy).await?;
    if !as_json {
        println!(
            "Wrote {} attachments ({} skipped)",
            attachments.written, attachments.skipped
        );
    }
    print_report(&report, as_json)
}
