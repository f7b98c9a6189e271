use fieldsync_core::store::entity_counts;
use fieldsync_core::SyncConfig;

use crate::commands::common::{count_items, format_count_lines, open_store};
use crate::error::CliError;

pub fn run_status(config: &SyncConfig, as_json: bool) -> Result<(), CliError> {
    let store = open_store(config)?;
    let counts = entity_counts(&store)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&count_items(&counts))?);
        return Ok(());
    }

    println!("Device:       {} ({})", config.device_name, config.device_id);
    println!("Database:     {}", config.database_path().display());
    println!("Storage root: {}", config.storage_root.display());
    println!();
    for line in format_count_lines(&counts) {
        println!("{line}");
    }
    let total: usize = counts.iter().map(|(_, count)| count).sum();
    println!("{:<20} {total:>6}", "total");
    Ok(())
}

