use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use oobmig_common::{Error, Result};

use crate::definitions::MigrationDefinition;

const DEFAULT_MIGRATOR_INTERVAL: Duration = Duration::from_secs(1);

/// One out-of-band migration's batch logic.
///
/// `up` and `down` each apply a single bounded batch and may be invoked again
/// after a partial failure, possibly from several replicas at once. Batches
/// should claim rows with skip-locked semantics so concurrent callers never
/// process the same record twice.
#[async_trait]
pub trait Migrator: Send + Sync {
    /// Fraction of work complete in `[0, 1]` for the given direction. Must be
    /// side-effect free.
    async fn progress(&self, apply_reverse: bool) -> Result<f64>;

    /// Apply one batch of the forward transformation.
    async fn up(&self) -> Result<()>;

    /// Apply one batch of the reverse transformation. A no-op is valid for
    /// non-destructive migrations.
    async fn down(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MigratorOptions {
    /// Delay between batches. Zero selects the default of one second.
    pub interval: Duration,
}

pub(crate) struct RegisteredMigrator {
    pub migrator: Arc<dyn Migrator>,
    pub interval: Duration,
}

/// Migrators keyed by migration id, built once at startup and handed to the
/// runner.
#[derive(Default)]
pub struct MigratorRegistry {
    migrators: HashMap<i64, Arc<RegisteredMigrator>>,
    definitions: Vec<MigrationDefinition>,
}

impl MigratorRegistry {
    pub fn new(definitions: Vec<MigrationDefinition>) -> Self {
        Self {
            migrators: HashMap::new(),
            definitions,
        }
    }

    pub fn register(
        &mut self,
        id: i64,
        migrator: Arc<dyn Migrator>,
        options: MigratorOptions,
    ) -> Result<()> {
        if self.migrators.contains_key(&id) {
            return Err(Error::Registration(format!(
                "migrator {id} already registered"
            )));
        }

        let interval = if options.interval.is_zero() {
            DEFAULT_MIGRATOR_INTERVAL
        } else {
            options.interval
        };
        self.migrators
            .insert(id, Arc::new(RegisteredMigrator { migrator, interval }));
        Ok(())
    }

    pub fn contains(&self, id: i64) -> bool {
        self.migrators.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.migrators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrators.is_empty()
    }

    /// Static definitions that `synchronize_metadata` writes to the store.
    pub fn definitions(&self) -> &[MigrationDefinition] {
        &self.definitions
    }

    pub(crate) fn get(&self, id: i64) -> Option<Arc<RegisteredMigrator>> {
        self.migrators.get(&id).cloned()
    }
}
