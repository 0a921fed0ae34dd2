use std::path::{Path, PathBuf};

use oobmig_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const CONFIG_FILE_NAME: &str = "config.yml";
const DATABASE_FILE_NAME: &str = "oobmig.db";

/// Resolves and parses the oobmig configuration file.
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Loader rooted at `~/.oobmig`.
    pub fn new() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::with_dir(home.join(".oobmig"))
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn default_config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    /// Load `path`, or the default config file when `path` is `None`. A
    /// missing default file yields the default config; a missing explicit
    /// file is an error.
    pub fn load(&self, path: Option<&Path>) -> Result<AppConfig> {
        let mut config = match path {
            Some(path) => load_file(path)?,
            None => {
                let default_path = self.default_config_path();
                if default_path.exists() {
                    load_file(&default_path)?
                } else {
                    debug!(
                        "no config at {}, using defaults",
                        default_path.display()
                    );
                    AppConfig::default()
                }
            }
        };

        if config.database_path.is_none() {
            config.database_path = Some(self.config_dir.join(DATABASE_FILE_NAME));
        }
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn load_file(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let config = match ext {
        "yml" | "yaml" => serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("YAML parse error: {e}")))?,
        "toml" => {
            toml::from_str(&contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))?
        }
        other => {
            return Err(Error::Config(format!(
                "unsupported config extension: {other}"
            )));
        }
    };

    info!("loaded config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_default_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::with_dir(dir.path());

        let config = loader.load(None).unwrap();
        assert_eq!(config.log.level, "info");
        assert!(!config.log.json);
        assert_eq!(config.database_path, Some(dir.path().join("oobmig.db")));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::with_dir(dir.path());
        let err = loader.load(Some(&dir.path().join("nope.yml"))).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn parses_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            "database_path: /var/lib/oobmig/state.db\ncurrent_version: \"4.2\"\nlog:\n  level: debug\n",
        )
        .unwrap();

        let config = ConfigLoader::with_dir(dir.path()).load(None).unwrap();
        assert_eq!(
            config.database_path,
            Some(PathBuf::from("/var/lib/oobmig/state.db"))
        );
        assert_eq!(config.current_version.as_deref(), Some("4.2"));
        assert_eq!(config.log.level, "debug");
        assert!(config.first_version.is_none());
    }

    #[test]
    fn parses_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oobmig.toml");
        std::fs::write(
            &path,
            "first_version = \"3.30\"\n\n[log]\njson = true\n",
        )
        .unwrap();

        let config = ConfigLoader::with_dir(dir.path())
            .load(Some(&path))
            .unwrap();
        assert_eq!(config.first_version.as_deref(), Some("3.30"));
        assert!(config.log.json);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "x=1").unwrap();

        let err = ConfigLoader::with_dir(dir.path())
            .load(Some(&path))
            .unwrap_err();
        assert!(err.to_string().contains("unsupported config extension: ini"));
    }
}
