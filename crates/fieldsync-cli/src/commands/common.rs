use std::path::{Path, PathBuf};

use fieldsync_core::config::default_config_path;
use fieldsync_core::conflict::ConflictRecord;
use fieldsync_core::merge::{MergeReport, Violation};
use fieldsync_core::{EntityType, SqliteStore, SyncConfig};
use serde::Serialize;

use crate::error::CliError;

/// Global path options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub config: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub storage_root: Option<PathBuf>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CountItem {
    pub entity_type: String,
    pub count: usize,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ViolationItem {
    pub child: String,
    pub child_id: i64,
    pub parent: String,
    pub parent_id: i64,
}

pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(default_config_path, Path::to_path_buf)
}

pub fn apply_overrides(config: &mut SyncConfig, overrides: &PathOverrides) {
    if let Some(root) = &overrides.storage_root {
        config.storage_root.clone_from(root);
    }
    if let Some(db_path) = &overrides.db_path {
        config.database_path = Some(db_path.clone());
    }
}

/// Defaults, then the config file, then the environment, then command-line paths.
pub fn load_config(overrides: &PathOverrides) -> Result<SyncConfig, CliError> {
    let path = resolve_config_path(overrides.config.as_deref());
    let mut config = SyncConfig::load_from_path(&path)?.with_env_overrides();
    apply_overrides(&mut config, overrides);
    config.validate()?;
    Ok(config)
}

pub fn open_store(config: &SyncConfig) -> Result<SqliteStore, CliError> {
    Ok(SqliteStore::open(config.database_path())?)
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn count_items(counts: &[(EntityType, usize)]) -> Vec<CountItem> {
    counts
        .iter()
        .map(|(entity_type, count)| CountItem {
            entity_type: entity_type.as_str().to_string(),
            count: *count,
        })
        .collect()
}

pub fn format_count_lines(counts: &[(EntityType, usize)]) -> Vec<String> {
    counts
        .iter()
        .map(|(entity_type, count)| format!("{:<20} {count:>6}", entity_type.as_str()))
        .collect()
}

pub fn format_conflict_lines(conflicts: &[ConflictRecord]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{:<20} id={:<6} local={} incoming={}  kept {} ({})",
                conflict.entity_type.as_str(),
                conflict.entity_id,
                format_timestamp(conflict.local_last_modified),
                format_timestamp(conflict.incoming_last_modified),
                conflict.winner.as_str(),
                conflict.reason.as_str()
            )
        })
        .collect()
}

pub fn violation_item(violation: &Violation) -> ViolationItem {
    ViolationItem {
        child: violation.child.as_str().to_string(),
        child_id: violation.child_id,
        parent: violation.parent.entity_type.as_str().to_string(),
        parent_id: violation.parent.id,
    }
}

pub fn format_violation_lines(violations: &[Violation]) -> Vec<String> {
    violations
        .iter()
        .map(|violation| {
            format!(
                "{} {} references missing {} {}",
                violation.child.as_str(),
                violation.child_id,
                violation.parent.entity_type.as_str(),
                violation.parent.id
            )
        })
        .collect()
}

pub fn print_report(report: &MergeReport, as_json: bool) -> Result<(), CliError> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("{report}");
    if !report.conflicts.is_empty() {
        println!();
        println!("Conflicts:");
        for line in format_conflict_lines(&report.conflicts) {
            println!("  {line}");
        }
    }
    Ok(())
}
