use oobmig_common::{Error, MigrationStatusError, Result};
use tracing::{info, warn};

use crate::migration::Migration;
use crate::version::Version;

/// Refuse to run `current` against data whose migration state it cannot read.
///
/// `first` is the earliest version this database has ever run. Migrations
/// deprecated at or before it never had legacy data and are exempt from the
/// completion check.
pub fn validate_migrations(
    migrations: &[Migration],
    current: Version,
    first: Version,
) -> Result<()> {
    let mut errors = Vec::new();

    for migration in migrations {
        // A newer release started this migration and it was not rolled back.
        if migration.introduced > current && migration.progress != 0.0 {
            errors.push(MigrationStatusError {
                migration_id: migration.id,
                expected_progress: 0.0,
                actual_progress: migration.progress,
            });
        }

        let Some(deprecated) = migration.deprecated else {
            continue;
        };
        if deprecated <= current && first < deprecated && migration.progress != 1.0 {
            errors.push(MigrationStatusError {
                migration_id: migration.id,
                expected_progress: 1.0,
                actual_progress: migration.progress,
            });
        }
    }

    if errors.is_empty() {
        info!(
            %current,
            %first,
            migrations = migrations.len(),
            "out-of-band migration state is compatible"
        );
        return Ok(());
    }

    for e in &errors {
        warn!(migration_id = e.migration_id, "{e}");
    }
    Err(Error::Validation(errors))
}
