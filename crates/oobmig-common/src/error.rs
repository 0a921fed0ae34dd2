use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("version error: {0}")]
    Version(String),

    #[error("schedule error: {0}")]
    Schedule(String),

    #[error("migrator error: {0}")]
    Migrator(String),

    #[error("registration error: {0}")]
    Registration(String),

    #[error("{}", format_status_errors(.0))]
    Validation(Vec<MigrationStatusError>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

/// A migration whose persisted progress is incompatible with the running version.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationStatusError {
    pub migration_id: i64,
    pub expected_progress: f64,
    pub actual_progress: f64,
}

impl fmt::Display for MigrationStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "migration {} expected to be at {:.2}% (at {:.2}%)",
            self.migration_id,
            self.expected_progress * 100.0,
            self.actual_progress * 100.0
        )
    }
}

fn format_status_errors(errors: &[MigrationStatusError]) -> String {
    let mut out = format!(
        "{} out-of-band migration{} in an unexpected state:",
        errors.len(),
        if errors.len() == 1 { " is" } else { "s are" }
    );
    for e in errors {
        out.push_str("\n  - ");
        out.push_str(&e.to_string());
    }
    out
}
