//! `SQLite` implementation of `LocalStore`

use std::path::Path;

use parking_lot::ReentrantMutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{migrations, LocalStore};
use crate::error::{Error, Result};
use crate::models::{EntitySnapshot, EntityType, SyncEntity};

/// Store backed by a single `SQLite` connection.
///
/// The connection sits behind a reentrant lock so a transaction holds it for
/// its whole duration while the record operations inside it lock again.
pub struct SqliteStore {
    conn: ReentrantMutex<Connection>,
}

impl SqliteStore {
    /// Open a store at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // WAL is unavailable for in-memory databases; ignore the result
        conn.execute_batch("PRAGMA journal_mode = WAL;").ok();
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: ReentrantMutex::new(conn),
        })
    }

    /// Schema version currently applied
    pub fn schema_version(&self) -> Result<i32> {
        migrations::get_version(&self.conn.lock())
    }

    fn parse_row(row: &Row<'_>) -> rusqlite::Result<(String, i64, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    }

    fn to_snapshot<T: SyncEntity>(
        (data, last_modified, origin_device): (String, i64, String),
    ) -> Result<EntitySnapshot<T>> {
        let entity: T = serde_json::from_str(&data)?;
        Ok(EntitySnapshot::new(entity, last_modified, origin_device))
    }
}

impl LocalStore for SqliteStore {
    fn get_all<T: SyncEntity>(&self) -> Result<Vec<EntitySnapshot<T>>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT data, last_modified, origin_device FROM {} ORDER BY id",
            T::ENTITY_TYPE.table_name()
        ))?;
        let rows = stmt
            .query_map([], Self::parse_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::to_snapshot).collect()
    }

    fn get_by_id<T: SyncEntity>(&self, id: i64) -> Result<Option<EntitySnapshot<T>>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!(
                    "SELECT data, last_modified, origin_device FROM {} WHERE id = ?",
                    T::ENTITY_TYPE.table_name()
                ),
                params![id],
                Self::parse_row,
            )
            .optional()?;
        row.map(Self::to_snapshot).transpose()
    }

    fn insert<T: SyncEntity>(&self, record: &EntitySnapshot<T>) -> Result<()> {
        let data = serde_json::to_string(&record.entity)?;
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO {} (id, data, last_modified, origin_device) VALUES (?, ?, ?, ?)",
                T::ENTITY_TYPE.table_name()
            ),
            params![record.id(), data, record.last_modified, record.origin_device],
        )
        .map_err(|error| {
            Error::Store(format!("Failed to insert {} {}: {error}", T::ENTITY_TYPE, record.id()))
        })?;
        Ok(())
    }

    fn update<T: SyncEntity>(&self, record: &EntitySnapshot<T>) -> Result<()> {
        let data = serde_json::to_string(&record.entity)?;
        let conn = self.conn.lock();
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET data = ?, last_modified = ?, origin_device = ? WHERE id = ?",
                T::ENTITY_TYPE.table_name()
            ),
            params![data, record.last_modified, record.origin_device, record.id()],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("{} {}", T::ENTITY_TYPE, record.id())));
        }
        Ok(())
    }

    fn delete_by_id<T: SyncEntity>(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!("DELETE FROM {} WHERE id = ?", T::ENTITY_TYPE.table_name()),
            params![id],
        )?;
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn count(&self, entity_type: EntityType) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", entity_type.table_name()),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn in_transaction<R, F>(&self, entity_type: EntityType, work: F) -> Result<R>
    where
        F: FnOnce(&Self) -> Result<R>,
    {
        let guard = self.conn.lock();
        guard.execute_batch("BEGIN IMMEDIATE")?;

        match work(self) {
            Ok(value) => {
                guard.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = guard.execute_batch("ROLLBACK") {
                    tracing::error!(%entity_type, "Rollback failed: {rollback_error}");
                }
                tracing::debug!(%entity_type, "Rolled back store transaction");
                Err(error)
            }
        }
    }
}
