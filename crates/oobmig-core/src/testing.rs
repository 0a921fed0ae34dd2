//! In-memory doubles for runner and validator tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use oobmig_common::{Error, Result};

use crate::definitions::MigrationDefinition;
use crate::migration::{MAX_MIGRATION_ERRORS, Migration, MigrationError};
use crate::migrator::Migrator;
use crate::store::MigrationStore;

pub fn migration(id: i64, introduced: &str, deprecated: Option<&str>) -> Migration {
    Migration {
        id,
        team: "team".into(),
        component: "component".into(),
        description: format!("migration {id}"),
        introduced: introduced.parse().unwrap(),
        deprecated: deprecated.map(|d| d.parse().unwrap()),
        progress: 0.0,
        created: Utc::now(),
        last_updated: None,
        non_destructive: false,
        is_enterprise: false,
        apply_reverse: false,
        errors: Vec::new(),
        metadata: serde_json::json!({}),
    }
}

pub struct MemoryStore {
    rows: Mutex<BTreeMap<i64, Migration>>,
}

impl MemoryStore {
    pub fn new(migrations: Vec<Migration>) -> Self {
        Self {
            rows: Mutex::new(migrations.into_iter().map(|m| (m.id, m)).collect()),
        }
    }

    pub fn get(&self, id: i64) -> Migration {
        self.rows.lock().unwrap()[&id].clone()
    }

    fn with_row<T>(&self, id: i64, f: impl FnOnce(&mut Migration) -> T) -> Result<T> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("migration {id}")))?;
        Ok(f(row))
    }
}

#[async_trait]
impl MigrationStore for MemoryStore {
    async fn list(&self) -> Result<Vec<Migration>> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Migration>> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn update_progress(&self, id: i64, progress: f64) -> Result<()> {
        self.with_row(id, |row| {
            if row.progress != progress {
                row.progress = progress;
                row.last_updated = Some(Utc::now());
            }
        })
    }

    async fn update_direction(&self, id: i64, apply_reverse: bool) -> Result<()> {
        self.with_row(id, |row| row.apply_reverse = apply_reverse)
    }

    async fn update_metadata(&self, id: i64, metadata: &serde_json::Value) -> Result<()> {
        self.with_row(id, |row| row.metadata = metadata.clone())
    }

    async fn add_error(&self, id: i64, message: &str) -> Result<()> {
        self.with_row(id, |row| {
            row.errors.insert(
                0,
                MigrationError {
                    message: message.to_string(),
                    created: Utc::now(),
                },
            );
            row.errors.truncate(MAX_MIGRATION_ERRORS);
            row.last_updated = Some(Utc::now());
        })
    }

    async fn synchronize_metadata(&self, _definitions: &[MigrationDefinition]) -> Result<()> {
        Ok(())
    }
}

/// A migrator reporting a scripted progress and recording every call.
pub struct ScriptedMigrator {
    progress: Mutex<f64>,
    fail_up: bool,
    fail_progress: bool,
    batch: Option<(Duration, f64)>,
    calls: Mutex<Vec<&'static str>>,
    reverse_queries: AtomicUsize,
    finished_batches: AtomicUsize,
}

impl ScriptedMigrator {
    pub fn new(progress: f64) -> Self {
        Self {
            progress: Mutex::new(progress),
            fail_up: false,
            fail_progress: false,
            batch: None,
            calls: Mutex::new(Vec::new()),
            reverse_queries: AtomicUsize::new(0),
            finished_batches: AtomicUsize::new(0),
        }
    }

    pub fn failing_up(mut self) -> Self {
        self.fail_up = true;
        self
    }

    pub fn failing_progress(mut self) -> Self {
        self.fail_progress = true;
        self
    }

    /// Each `up` takes `duration` and leaves progress at `progress_after`.
    pub fn slow_up(mut self, duration: Duration, progress_after: f64) -> Self {
        self.batch = Some((duration, progress_after));
        self
    }

    pub fn finished_batches(&self) -> usize {
        self.finished_batches.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reverse_progress_queries(&self) -> usize {
        self.reverse_queries.load(Ordering::SeqCst)
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Migrator for ScriptedMigrator {
    async fn progress(&self, apply_reverse: bool) -> Result<f64> {
        self.record("progress");
        if apply_reverse {
            self.reverse_queries.fetch_add(1, Ordering::SeqCst);
        }
        if self.fail_progress {
            return Err(Error::Migrator("progress query failed".into()));
        }
        Ok(*self.progress.lock().unwrap())
    }

    async fn up(&self) -> Result<()> {
        self.record("up");
        if self.fail_up {
            return Err(Error::Migrator("batch exploded".into()));
        }
        if let Some((duration, progress_after)) = self.batch {
            tokio::time::sleep(duration).await;
            *self.progress.lock().unwrap() = progress_after;
        }
        self.finished_batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn down(&self) -> Result<()> {
        self.record("down");
        Ok(())
    }
}
