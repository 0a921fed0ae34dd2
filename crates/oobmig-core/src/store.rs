use async_trait::async_trait;
use oobmig_common::Result;

use crate::definitions::MigrationDefinition;
use crate::migration::Migration;

/// Durable record of every out-of-band migration.
///
/// Implementations must serialize conflicting writes to the same migration,
/// since several processes may drive the same table.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// All migrations ordered by id, each with its most recent errors.
    async fn list(&self) -> Result<Vec<Migration>>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Migration>>;

    /// Record progress. Writes nothing when the value is unchanged.
    async fn update_progress(&self, id: i64, progress: f64) -> Result<()>;

    async fn update_direction(&self, id: i64, apply_reverse: bool) -> Result<()>;

    /// Flip the direction of several migrations. Stores with transactions
    /// should apply this atomically.
    async fn update_directions(&self, ids: &[i64], apply_reverse: bool) -> Result<()> {
        for &id in ids {
            self.update_direction(id, apply_reverse).await?;
        }
        Ok(())
    }

    /// Replace the migrator-private metadata blob.
    async fn update_metadata(&self, id: i64, metadata: &serde_json::Value) -> Result<()>;

    /// Append an error, pruning the oldest beyond `MAX_MIGRATION_ERRORS`.
    async fn add_error(&self, id: i64, message: &str) -> Result<()>;

    /// Upsert static definitions. Rows without a definition are left alone, as
    /// a newer binary may have written them.
    async fn synchronize_metadata(&self, definitions: &[MigrationDefinition]) -> Result<()>;
}
