use std::collections::HashSet;

use oobmig_common::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::version::Version;

const EMBEDDED_DEFINITIONS: &str = include_str!("../oobmigrations.yaml");

/// Static description of one out-of-band migration, as authored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationDefinition {
    pub id: i64,
    pub team: String,
    pub component: String,
    pub description: String,
    #[serde(default)]
    pub non_destructive: bool,
    #[serde(default)]
    pub is_enterprise: bool,
    pub introduced: Version,
    #[serde(default)]
    pub deprecated: Option<Version>,
}

/// Definitions shipped with this binary.
pub fn embedded() -> Result<Vec<MigrationDefinition>> {
    parse(EMBEDDED_DEFINITIONS)
}

/// Parse and check a YAML list of definitions.
pub fn parse(yaml: &str) -> Result<Vec<MigrationDefinition>> {
    let definitions: Vec<MigrationDefinition> = serde_yaml::from_str(yaml)
        .map_err(|e| Error::Config(format!("invalid migration definitions: {e}")))?;
    check(&definitions)?;
    Ok(definitions)
}

fn check(definitions: &[MigrationDefinition]) -> Result<()> {
    let mut seen = HashSet::new();
    for def in definitions {
        if !seen.insert(def.id) {
            return Err(Error::Config(format!(
                "duplicate migration definition id {}",
                def.id
            )));
        }
        if let Some(deprecated) = def.deprecated {
            if deprecated <= def.introduced {
                return Err(Error::Config(format!(
                    "migration {} is deprecated ({deprecated}) no later than it is introduced ({})",
                    def.id, def.introduced
                )));
            }
        }
    }
    Ok(())
}
