//! Store schema migrations

use rusqlite::Connection;

use crate::error::Result;
use crate::models::MERGE_ORDER;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
pub fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn apply(conn: &Connection, version: i32, statements: &[String]) -> Result<()> {
    conn.execute_batch("BEGIN TRANSACTION")?;

    for stmt in statements {
        if let Err(error) = conn.execute_batch(stmt) {
            conn.execute_batch("ROLLBACK").ok();
            return Err(error.into());
        }
    }

    if let Err(error) = conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version]) {
        conn.execute_batch("ROLLBACK").ok();
        return Err(error.into());
    }

    conn.execute_batch("COMMIT")?;
    tracing::info!("Migrated store to version {version}");
    Ok(())
}

/// Migration to version 1: one table per entity type
fn migrate_v1(conn: &Connection) -> Result<()> {
    let mut statements = vec!["CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )"
    .to_string()];

    statements.extend(MERGE_ORDER.iter().map(|entity_type| {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY,
                data TEXT NOT NULL,
                last_modified INTEGER NOT NULL
            )",
            entity_type.table_name()
        )
    }));

    apply(conn, 1, &statements)
}

/// Migration to version 2: origin device column and timestamp index
fn migrate_v2(conn: &Connection) -> Result<()> {
    let statements: Vec<String> = MERGE_ORDER
        .iter()
        .flat_map(|entity_type| {
            let table = entity_type.table_name();
            [
                format!("ALTER TABLE {table} ADD COLUMN origin_device TEXT NOT NULL DEFAULT ''"),
                format!(
                    "CREATE INDEX IF NOT EXISTS idx_{table}_modified ON {table}(last_modified DESC)"
                ),
            ]
        })
        .collect();

    apply(conn, 2, &statements)
}
