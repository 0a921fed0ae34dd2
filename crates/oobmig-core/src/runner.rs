use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use oobmig_common::Result;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::migration::Migration;
use crate::migrator::{MigratorRegistry, RegisteredMigrator};
use crate::store::MigrationStore;
use crate::validation::validate_migrations;
use crate::version::Version;

const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct RunnerOptions {
    /// How often migration rows are re-read from the store.
    pub refresh_interval: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

type ShouldRun = Box<dyn Fn(&Migration) -> bool + Send + Sync>;

/// Drives every registered migrator towards completion in its current direction.
///
/// One task polls the store; each migration with a registered migrator gets
/// its own long-lived loop fed through a single-slot mailbox holding the
/// latest row snapshot.
pub struct Runner {
    store: Arc<dyn MigrationStore>,
    registry: Arc<MigratorRegistry>,
    options: RunnerOptions,
    cancel: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
}

impl Runner {
    pub fn new(
        store: Arc<dyn MigrationStore>,
        registry: MigratorRegistry,
        options: RunnerOptions,
    ) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            options,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Upsert the registry's static definitions into the store.
    pub async fn synchronize_metadata(&self) -> Result<()> {
        let definitions = self.registry.definitions();
        self.store.synchronize_metadata(definitions).await?;
        info!(
            definitions = definitions.len(),
            "synchronized out-of-band migration metadata"
        );
        Ok(())
    }

    /// Check persisted migration state against the running version.
    pub async fn validate(&self, current: Version, first: Version) -> Result<()> {
        let migrations = self.store.list().await?;
        validate_migrations(&migrations, current, first)
    }

    /// Change direction for the given migrations. Running loops pick the change
    /// up on the next refresh.
    pub async fn update_direction(&self, ids: &[i64], apply_reverse: bool) -> Result<()> {
        self.store.update_directions(ids, apply_reverse).await?;
        info!(?ids, apply_reverse, "updated out-of-band migration direction");
        Ok(())
    }

    /// Run every migration that is live for `current`. Migrations deprecated
    /// at or before `first` never had legacy data to transform.
    pub fn start(&self, current: Version, first: Version) {
        self.start_with(Box::new(move |m: &Migration| {
            m.introduced <= current && m.deprecated.is_none_or(|d| first < d)
        }));
    }

    /// Run only the named migrations.
    pub fn start_partial(&self, ids: &[i64]) {
        let ids: HashSet<i64> = ids.iter().copied().collect();
        self.start_with(Box::new(move |m: &Migration| ids.contains(&m.id)));
    }

    fn start_with(&self, should_run: ShouldRun) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("out-of-band migration runner already started");
            return;
        }

        info!(
            migrators = self.registry.len(),
            refresh_secs = self.options.refresh_interval.as_secs_f64(),
            "starting out-of-band migration runner"
        );

        let poller = Poller {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            refresh_interval: self.options.refresh_interval,
            should_run,
            tracker: self.tracker.clone(),
            cancel: self.cancel.clone(),
        };
        self.tracker.spawn(poller.run());
    }

    /// Cancel polling and wait for every migration loop to exit. In-flight
    /// batches are allowed to finish.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("out-of-band migration runner stopped");
    }
}

struct Poller {
    store: Arc<dyn MigrationStore>,
    registry: Arc<MigratorRegistry>,
    refresh_interval: Duration,
    should_run: ShouldRun,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Poller {
    async fn run(self) {
        let mut mailboxes: HashMap<i64, watch::Sender<Migration>> = HashMap::new();

        loop {
            let listed = tokio::select! {
                _ = self.cancel.cancelled() => break,
                listed = self.store.list() => listed,
            };

            match listed {
                Ok(migrations) => self.dispatch(migrations, &mut mailboxes),
                Err(e) => error!(error = %e, "failed to list out-of-band migrations"),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = time::sleep(self.refresh_interval) => {}
            }
        }

        // Dropping the senders closes every mailbox and ends each loop.
        drop(mailboxes);
        debug!("out-of-band migration poller stopped");
    }

    fn dispatch(
        &self,
        migrations: Vec<Migration>,
        mailboxes: &mut HashMap<i64, watch::Sender<Migration>>,
    ) {
        for migration in migrations {
            let Some(registered) = self.registry.get(migration.id) else {
                continue;
            };
            if !(self.should_run)(&migration) {
                continue;
            }

            if let Some(mailbox) = mailboxes.get(&migration.id) {
                mailbox.send_replace(migration);
                continue;
            }

            let id = migration.id;
            let (tx, rx) = watch::channel(migration);
            mailboxes.insert(id, tx);
            self.tracker
                .spawn(run_migration_loop(Arc::clone(&self.store), registered, rx));
        }
    }
}

async fn run_migration_loop(
    store: Arc<dyn MigrationStore>,
    registered: Arc<RegisteredMigrator>,
    mut mailbox: watch::Receiver<Migration>,
) {
    let mut migration = mailbox.borrow_and_update().clone();
    let id = migration.id;
    info!(
        migration_id = id,
        interval_ms = registered.interval.as_millis() as u64,
        "out-of-band migration loop started"
    );

    // Stored progress may lag the migrator's backing data.
    refresh_progress(store.as_ref(), &registered, &mut migration).await;

    let mut ticker = time::interval_at(Instant::now() + registered.interval, registered.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // A closed mailbox wins over a due tick so no batch starts after stop.
        tokio::select! {
            biased;
            changed = mailbox.changed() => {
                if changed.is_err() {
                    break;
                }
                migration = mailbox.borrow_and_update().clone();
                refresh_progress(store.as_ref(), &registered, &mut migration).await;
            }
            _ = ticker.tick() => {
                if migration.complete() {
                    debug!(migration_id = id, status = migration.status().as_str(), "nothing to do");
                    continue;
                }
                run_batch(store.as_ref(), &registered, &mut migration).await;
            }
        }
    }

    info!(migration_id = id, "out-of-band migration loop stopped");
}

async fn run_batch(
    store: &dyn MigrationStore,
    registered: &RegisteredMigrator,
    migration: &mut Migration,
) {
    let result = if migration.apply_reverse {
        registered.migrator.down().await
    } else {
        registered.migrator.up().await
    };

    if let Err(e) = result {
        warn!(
            migration_id = migration.id,
            apply_reverse = migration.apply_reverse,
            error = %e,
            "out-of-band migration batch failed"
        );
        if let Err(store_err) = store.add_error(migration.id, &e.to_string()).await {
            error!(migration_id = migration.id, error = %store_err, "failed to record migration error");
        }
    }

    refresh_progress(store, registered, migration).await;
}

async fn refresh_progress(
    store: &dyn MigrationStore,
    registered: &RegisteredMigrator,
    migration: &mut Migration,
) {
    let progress = match registered.migrator.progress(migration.apply_reverse).await {
        Ok(progress) if progress.is_finite() => progress.clamp(0.0, 1.0),
        Ok(progress) => {
            warn!(migration_id = migration.id, progress, "migrator reported non-finite progress");
            return;
        }
        Err(e) => {
            warn!(migration_id = migration.id, error = %e, "failed to query migration progress");
            return;
        }
    };

    migration.progress = progress;
    if let Err(e) = store.update_progress(migration.id, progress).await {
        error!(migration_id = migration.id, error = %e, "failed to persist migration progress");
        return;
    }
    debug!(
        migration_id = migration.id,
        progress,
        apply_reverse = migration.apply_reverse,
        "migration progress updated"
    );
}
