use std::path::Path;

use fieldsync_core::export::import_package;
use fieldsync_core::merge::find_violations;
use fieldsync_core::store::snapshot_into_memory;
use fieldsync_core::{merge, MergeStrategy, SyncConfig};

use crate::commands::common::{
    format_violation_lines, open_store, print_report, violation_item, ViolationItem,
};
use crate::error::CliError;

/// Validate a package and dry-run a validated merge against a copy of the store.
pub async fn run_merge_preview(
    config: &SyncConfig,
    path: &Path,
    as_json: bool,
) -> Result<(), CliError> {
    let package = import_package(path).await?;

    let violations = find_violations(&package.entities);
    if !violations.is_empty() {
        if as_json {
            let items = violations
                .iter()
                .map(violation_item)
                .collect::<Vec<ViolationItem>>();
            println!("{}", serde_json::to_string_pretty(&items)?);
        } else {
            for line in format_violation_lines(&violations) {
                println!("{line}");
            }
        }
        return Err(CliError::PreviewRejected(violations.len()));
    }

    let store = open_store(config)?;
    let scratch = snapshot_into_memory(&store)?;
    let report = merge(&scratch, &package.entities, MergeStrategy::Validated)?;
    print_report(&report, as_json)
}
