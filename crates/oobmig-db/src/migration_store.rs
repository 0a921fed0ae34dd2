use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oobmig_common::{Error, Result};
use oobmig_core::{
    MAX_MIGRATION_ERRORS, Migration, MigrationDefinition, MigrationError, MigrationStore, Version,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

use crate::schema;

const MIGRATION_COLUMNS: &str = "id, team, component, description,
    introduced_version_major, introduced_version_minor,
    deprecated_version_major, deprecated_version_minor,
    progress, created, last_updated, non_destructive, is_enterprise,
    apply_reverse, metadata";

/// SQLite-backed record of out-of-band migrations.
pub struct SqliteMigrationStore {
    conn: Mutex<Connection>,
}

impl SqliteMigrationStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening migration store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        schema::apply(&conn, schema::STEPS)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("migration store lock poisoned".into()))
    }

    /// Run `f` inside a transaction. Returning an error rolls back every write
    /// made through the handle, including nested transactions.
    pub fn transact<T>(&self, f: impl FnOnce(&StoreTx<'_>) -> Result<T>) -> Result<T> {
        let conn = self.connection()?;
        StoreTx {
            conn: &conn,
            depth: 0,
        }
        .transact(f)
    }
}

/// Store operations bound to an open transaction.
pub struct StoreTx<'a> {
    conn: &'a Connection,
    depth: usize,
}

impl StoreTx<'_> {
    /// Nested transaction backed by a savepoint.
    pub fn transact<T>(&self, f: impl FnOnce(&StoreTx<'_>) -> Result<T>) -> Result<T> {
        let savepoint = format!("oobmig_tx_{}", self.depth);
        self.conn
            .execute_batch(&format!("SAVEPOINT {savepoint};"))
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;

        let inner = StoreTx {
            conn: self.conn,
            depth: self.depth + 1,
        };
        match f(&inner) {
            Ok(value) => {
                self.conn
                    .execute_batch(&format!("RELEASE {savepoint};"))
                    .map_err(|e| Error::Database(format!("failed to commit transaction: {e}")))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self
                    .conn
                    .execute_batch(&format!("ROLLBACK TO {savepoint}; RELEASE {savepoint};"))
                {
                    debug!("rollback of {savepoint} failed: {rollback_err}");
                }
                Err(e)
            }
        }
    }

    pub fn list(&self) -> Result<Vec<Migration>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {MIGRATION_COLUMNS} FROM out_of_band_migrations ORDER BY id"
            ))
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], read_migration)
            .map_err(|e| Error::Database(format!("failed to query migrations: {e}")))?;

        let mut migrations = Vec::new();
        for row in rows {
            migrations.push(
                row.map_err(|e| Error::Database(format!("failed to read migration row: {e}")))?,
            );
        }

        let mut errors = self.errors_by_migration(None)?;
        for migration in &mut migrations {
            migration.errors = errors.remove(&migration.id).unwrap_or_default();
        }
        Ok(migrations)
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<Migration>> {
        let migration = self
            .conn
            .query_row(
                &format!("SELECT {MIGRATION_COLUMNS} FROM out_of_band_migrations WHERE id = ?1"),
                params![id],
                read_migration,
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load migration {id}: {e}")))?;

        let Some(mut migration) = migration else {
            return Ok(None);
        };
        migration.errors = self
            .errors_by_migration(Some(id))?
            .remove(&id)
            .unwrap_or_default();
        Ok(Some(migration))
    }

    /// Errors grouped by migration, newest first.
    fn errors_by_migration(&self, id: Option<i64>) -> Result<HashMap<i64, Vec<MigrationError>>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT migration_id, message, created
                 FROM out_of_band_migrations_errors
                 WHERE ?1 IS NULL OR migration_id = ?1
                 ORDER BY migration_id, id DESC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map(params![id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    MigrationError {
                        message: row.get(1)?,
                        created: parse_datetime(row, 2)?,
                    },
                ))
            })
            .map_err(|e| Error::Database(format!("failed to query migration errors: {e}")))?;

        let mut grouped: HashMap<i64, Vec<MigrationError>> = HashMap::new();
        for row in rows {
            let (migration_id, error) =
                row.map_err(|e| Error::Database(format!("failed to read error row: {e}")))?;
            grouped.entry(migration_id).or_default().push(error);
        }
        Ok(grouped)
    }

    pub fn update_progress(&self, id: i64, progress: f64) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE out_of_band_migrations
                 SET progress = ?2, last_updated = ?3
                 WHERE id = ?1 AND progress != ?2",
                params![id, progress, Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Database(format!("failed to update progress of {id}: {e}")))?;
        if changed > 0 {
            debug!(migration_id = id, progress, "persisted migration progress");
        }
        Ok(())
    }

    pub fn update_direction(&self, id: i64, apply_reverse: bool) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE out_of_band_migrations SET apply_reverse = ?2 WHERE id = ?1",
                params![id, apply_reverse],
            )
            .map_err(|e| Error::Database(format!("failed to update direction of {id}: {e}")))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("migration {id}")));
        }
        Ok(())
    }

    pub fn update_metadata(&self, id: i64, metadata: &serde_json::Value) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE out_of_band_migrations SET metadata = ?2 WHERE id = ?1",
                params![id, serde_json::to_string(metadata)?],
            )
            .map_err(|e| Error::Database(format!("failed to update metadata of {id}: {e}")))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("migration {id}")));
        }
        Ok(())
    }

    pub fn add_error(&self, id: i64, message: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO out_of_band_migrations_errors (migration_id, message, created)
                 VALUES (?1, ?2, ?3)",
                params![id, message, now],
            )
            .map_err(|e| Error::Database(format!("failed to record error for {id}: {e}")))?;

        self.conn
            .execute(
                "DELETE FROM out_of_band_migrations_errors
                 WHERE migration_id = ?1 AND id NOT IN (
                     SELECT id FROM out_of_band_migrations_errors
                     WHERE migration_id = ?1
                     ORDER BY id DESC
                     LIMIT ?2
                 )",
                params![id, MAX_MIGRATION_ERRORS as i64],
            )
            .map_err(|e| Error::Database(format!("failed to prune errors for {id}: {e}")))?;

        self.conn
            .execute(
                "UPDATE out_of_band_migrations SET last_updated = ?2 WHERE id = ?1",
                params![id, now],
            )
            .map_err(|e| Error::Database(format!("failed to touch migration {id}: {e}")))?;
        Ok(())
    }

    pub fn synchronize_metadata(&self, definitions: &[MigrationDefinition]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        for def in definitions {
            self.conn
                .execute(
                    "INSERT INTO out_of_band_migrations (
                        id, team, component, description,
                        introduced_version_major, introduced_version_minor,
                        deprecated_version_major, deprecated_version_minor,
                        non_destructive, is_enterprise, created
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    ON CONFLICT(id) DO UPDATE SET
                        team = excluded.team,
                        component = excluded.component,
                        description = excluded.description,
                        introduced_version_major = excluded.introduced_version_major,
                        introduced_version_minor = excluded.introduced_version_minor,
                        deprecated_version_major = excluded.deprecated_version_major,
                        deprecated_version_minor = excluded.deprecated_version_minor,
                        non_destructive = excluded.non_destructive,
                        is_enterprise = excluded.is_enterprise",
                    params![
                        def.id,
                        def.team,
                        def.component,
                        def.description,
                        def.introduced.major,
                        def.introduced.minor,
                        def.deprecated.map(|v| v.major),
                        def.deprecated.map(|v| v.minor),
                        def.non_destructive,
                        def.is_enterprise,
                        now,
                    ],
                )
                .map_err(|e| {
                    Error::Database(format!("failed to synchronize migration {}: {e}", def.id))
                })?;
        }
        Ok(())
    }
}

fn read_migration(row: &Row<'_>) -> rusqlite::Result<Migration> {
    let deprecated_major: Option<u32> = row.get(6)?;
    let deprecated_minor: Option<u32> = row.get(7)?;
    let metadata: String = row.get(14)?;
    let metadata = serde_json::from_str(&metadata)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(14, Type::Text, Box::new(e)))?;

    Ok(Migration {
        id: row.get(0)?,
        team: row.get(1)?,
        component: row.get(2)?,
        description: row.get(3)?,
        introduced: Version::new(row.get(4)?, row.get(5)?),
        deprecated: deprecated_major
            .zip(deprecated_minor)
            .map(|(major, minor)| Version::new(major, minor)),
        progress: row.get(8)?,
        created: parse_datetime(row, 9)?,
        last_updated: match row.get::<_, Option<String>>(10)? {
            Some(_) => Some(parse_datetime(row, 10)?),
            None => None,
        },
        non_destructive: row.get(11)?,
        is_enterprise: row.get(12)?,
        apply_reverse: row.get(13)?,
        errors: Vec::new(),
        metadata,
    })
}

/// Timestamps are always written as RFC 3339.
fn parse_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[async_trait]
impl MigrationStore for SqliteMigrationStore {
    async fn list(&self) -> Result<Vec<Migration>> {
        self.transact(|tx| tx.list())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Migration>> {
        self.transact(|tx| tx.get_by_id(id))
    }

    async fn update_progress(&self, id: i64, progress: f64) -> Result<()> {
        self.transact(|tx| tx.update_progress(id, progress))
    }

    async fn update_direction(&self, id: i64, apply_reverse: bool) -> Result<()> {
        self.transact(|tx| tx.update_direction(id, apply_reverse))
    }

    async fn update_directions(&self, ids: &[i64], apply_reverse: bool) -> Result<()> {
        self.transact(|tx| {
            for &id in ids {
                tx.update_direction(id, apply_reverse)?;
            }
            Ok(())
        })
    }

    async fn update_metadata(&self, id: i64, metadata: &serde_json::Value) -> Result<()> {
        self.transact(|tx| tx.update_metadata(id, metadata))
    }

    async fn add_error(&self, id: i64, message: &str) -> Result<()> {
        self.transact(|tx| tx.add_error(id, message))
    }

    async fn synchronize_metadata(&self, definitions: &[MigrationDefinition]) -> Result<()> {
        self.transact(|tx| tx.synchronize_metadata(definitions))?;
        info!(
            definitions = definitions.len(),
            "migration definitions synchronized"
        );
        Ok(())
    }
}
