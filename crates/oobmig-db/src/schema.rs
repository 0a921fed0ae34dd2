use oobmig_common::{Error, Result};
use rusqlite::{Connection, params};
use tracing::info;

/// Schema step for the store's own tables.
///
/// Each step has a version number and a SQL batch. Steps are applied in order
/// and tracked in a `_schema_migrations` table.
pub struct SchemaStep {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "create_out_of_band_migrations",
        sql: "CREATE TABLE IF NOT EXISTS out_of_band_migrations (
                id INTEGER PRIMARY KEY,
                team TEXT NOT NULL,
                component TEXT NOT NULL,
                description TEXT NOT NULL,
                introduced_version_major INTEGER NOT NULL,
                introduced_version_minor INTEGER NOT NULL,
                deprecated_version_major INTEGER,
                deprecated_version_minor INTEGER,
                progress REAL NOT NULL DEFAULT 0
                    CHECK (progress >= 0 AND progress <= 1),
                created TEXT NOT NULL,
                last_updated TEXT,
                non_destructive INTEGER NOT NULL DEFAULT 0,
                apply_reverse INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS out_of_band_migrations_errors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                migration_id INTEGER NOT NULL
                    REFERENCES out_of_band_migrations(id) ON DELETE CASCADE,
                message TEXT NOT NULL,
                created TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_oob_errors_migration
                ON out_of_band_migrations_errors(migration_id, id);",
    },
    SchemaStep {
        version: 2,
        name: "add_enterprise_and_metadata",
        sql: "ALTER TABLE out_of_band_migrations
                ADD COLUMN is_enterprise INTEGER NOT NULL DEFAULT 0;
            ALTER TABLE out_of_band_migrations
                ADD COLUMN metadata TEXT NOT NULL DEFAULT '{}';",
    },
];

/// Apply every step newer than the recorded schema version.
pub fn apply(conn: &Connection, steps: &[SchemaStep]) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| Error::Database(format!("failed to create schema table: {e}")))?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(format!("failed to read schema version: {e}")))?;

    for step in steps.iter().filter(|s| s.version > current) {
        // Dropping the transaction on error rolls the step back.
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::Database(format!("failed to begin schema step: {e}")))?;
        tx.execute_batch(step.sql).map_err(|e| {
            Error::Database(format!(
                "schema step {} ({}) failed: {e}",
                step.version, step.name
            ))
        })?;
        tx.execute(
            "INSERT INTO _schema_migrations (version, name) VALUES (?1, ?2)",
            params![step.version, step.name],
        )
        .map_err(|e| Error::Database(format!("failed to record schema step: {e}")))?;
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit schema step: {e}")))?;
        info!("applied schema step {} ({})", step.version, step.name);
    }

    Ok(())
}
