use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use oobmig_common::{Error, Result};
use oobmig_core::{
    MigrationDefinition, MigrationStore, Migrator, MigratorOptions, MigratorRegistry, Runner,
    RunnerOptions, Version,
};
use oobmig_db::SqliteMigrationStore;

fn v(s: &str) -> Version {
    s.parse().expect("valid version")
}

fn def(id: i64, introduced: &str, deprecated: Option<&str>) -> MigrationDefinition {
    MigrationDefinition {
        id,
        team: "storage".into(),
        component: "repo".into(),
        description: format!("migration {id}"),
        non_destructive: false,
        is_enterprise: false,
        introduced: v(introduced),
        deprecated: deprecated.map(v),
    }
}

/// Processes a fixed number of records in fixed-size batches.
struct BackfillMigrator {
    total: usize,
    batch: usize,
    done: Mutex<usize>,
    fail: bool,
}

impl BackfillMigrator {
    fn new(total: usize, batch: usize) -> Self {
        Self {
            total,
            batch,
            done: Mutex::new(0),
            fail: false,
        }
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl Migrator for BackfillMigrator {
    async fn progress(&self, _apply_reverse: bool) -> Result<f64> {
        Ok(*self.done.lock().unwrap() as f64 / self.total as f64)
    }

    async fn up(&self) -> Result<()> {
        if self.fail {
            return Err(Error::Migrator("connection reset by peer".into()));
        }
        let mut done = self.done.lock().unwrap();
        *done = (*done + self.batch).min(self.total);
        Ok(())
    }

    async fn down(&self) -> Result<()> {
        let mut done = self.done.lock().unwrap();
        *done = done.saturating_sub(self.batch);
        Ok(())
    }
}

fn runner_for(
    store: &Arc<SqliteMigrationStore>,
    definitions: Vec<MigrationDefinition>,
    migrators: Vec<(i64, Arc<BackfillMigrator>)>,
    refresh_interval: Duration,
) -> Runner {
    let mut registry = MigratorRegistry::new(definitions);
    for (id, migrator) in migrators {
        registry
            .register(
                id,
                migrator,
                MigratorOptions {
                    interval: Duration::from_secs(1),
                },
            )
            .expect("registration should succeed");
    }
    Runner::new(store.clone(), registry, RunnerOptions { refresh_interval })
}

#[tokio::test(start_paused = true)]
async fn migration_runs_forward_then_reverts() {
    let store = Arc::new(SqliteMigrationStore::in_memory().unwrap());
    let migrator = Arc::new(BackfillMigrator::new(10, 4));
    let runner = runner_for(
        &store,
        vec![def(1, "3.10", Some("3.20")), def(2, "3.10", None)],
        vec![(1, migrator)],
        Duration::from_secs(10),
    );

    runner.synchronize_metadata().await.unwrap();
    runner.validate(v("3.15"), v("3.10")).await.unwrap();
    runner.start(v("3.15"), v("3.10"));

    tokio::time::sleep(Duration::from_millis(3500)).await;
    let migrations = store.list().await.unwrap();
    assert_eq!(migrations[0].progress, 1.0);
    assert!(migrations[0].complete());
    assert_eq!(migrations[1].progress, 0.0);
    runner.validate(v("3.20"), v("3.10")).await.unwrap();

    runner.update_direction(&[1], true).await.unwrap();
    tokio::time::sleep(Duration::from_secs(11)).await;
    runner.stop().await;

    let reverted = store.get_by_id(1).await.unwrap().unwrap();
    assert!(reverted.apply_reverse);
    assert_eq!(reverted.progress, 0.0);
    assert!(reverted.complete());
}

#[tokio::test(start_paused = true)]
async fn batch_failures_are_persisted() {
    let store = Arc::new(SqliteMigrationStore::in_memory().unwrap());
    let migrator = Arc::new(BackfillMigrator::new(10, 4).failing());
    let runner = runner_for(
        &store,
        vec![def(1, "3.10", None)],
        vec![(1, migrator)],
        Duration::from_secs(3600),
    );

    runner.synchronize_metadata().await.unwrap();
    runner.start(v("3.15"), v("3.10"));
    tokio::time::sleep(Duration::from_millis(5500)).await;
    runner.stop().await;

    let m = store.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(m.errors.len(), 5);
    assert_eq!(m.errors[0].message, "migrator error: connection reset by peer");
    assert_eq!(m.progress, 0.0);
}

#[tokio::test]
async fn validation_blocks_unfinished_migrations() {
    let store = Arc::new(SqliteMigrationStore::in_memory().unwrap());
    let runner = runner_for(
        &store,
        vec![def(14, "3.11", Some("3.12"))],
        Vec::new(),
        Duration::from_secs(30),
    );
    runner.synchronize_metadata().await.unwrap();
    store.update_progress(14, 0.65).await.unwrap();

    let err = runner.validate(v("3.12"), v("3.10")).await.unwrap_err();
    match &err {
        Error::Validation(errors) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].migration_id, 14);
            assert_eq!(errors[0].expected_progress, 1.0);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(
        err.to_string()
            .contains("migration 14 expected to be at 100.00% (at 65.00%)")
    );
}
