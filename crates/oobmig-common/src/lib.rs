pub mod error;

pub use error::{Error, MigrationStatusError, Result};
