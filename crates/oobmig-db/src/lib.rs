pub mod migration_store;
pub mod schema;

pub use migration_store::{SqliteMigrationStore, StoreTx};
