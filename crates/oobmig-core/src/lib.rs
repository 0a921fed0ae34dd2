pub mod definitions;
pub mod migration;
pub mod migrator;
pub mod runner;
pub mod schedule;
pub mod store;
pub mod validation;
pub mod version;

#[cfg(test)]
mod testing;

pub use definitions::MigrationDefinition;
pub use migration::{MAX_MIGRATION_ERRORS, Migration, MigrationError, MigrationStatus};
pub use migrator::{Migrator, MigratorOptions, MigratorRegistry};
pub use runner::{Runner, RunnerOptions};
pub use schedule::{MigrationInterrupt, schedule_interrupts, schedule_migration_interrupts};
pub use store::MigrationStore;
pub use validation::validate_migrations;
pub use version::{Version, VersionOrder, compare, upgrade_range};
