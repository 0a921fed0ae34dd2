use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite file holding migration state. Defaults to `<config dir>/oobmig.db`.
    pub database_path: Option<PathBuf>,
    /// Version of the running binary, e.g. `"4.2"`.
    pub current_version: Option<String>,
    /// Earliest version this database has ever run.
    pub first_version: Option<String>,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
