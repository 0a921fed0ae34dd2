use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::version::Version;

/// Number of error entries retained per migration; older entries are pruned.
pub const MAX_MIGRATION_ERRORS: usize = 100;

/// A persisted out-of-band migration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    pub id: i64,
    pub team: String,
    pub component: String,
    pub description: String,
    pub introduced: Version,
    pub deprecated: Option<Version>,
    pub progress: f64,
    pub created: DateTime<Utc>,
    pub last_updated: Option<DateTime<Utc>>,
    pub non_destructive: bool,
    pub is_enterprise: bool,
    pub apply_reverse: bool,
    /// Most recent first.
    pub errors: Vec<MigrationError>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationError {
    pub message: String,
    pub created: DateTime<Utc>,
}

/// Where a migration stands relative to its current direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationStatus {
    InProgressForward,
    CompleteForward,
    InProgressReverse,
    CompleteReverse,
}

impl MigrationStatus {
    pub fn from_progress(progress: f64, apply_reverse: bool) -> Self {
        match (apply_reverse, progress) {
            (false, p) if p >= 1.0 => Self::CompleteForward,
            (false, _) => Self::InProgressForward,
            (true, p) if p <= 0.0 => Self::CompleteReverse,
            (true, _) => Self::InProgressReverse,
        }
    }

    pub fn is_complete(self) -> bool {
        matches!(self, Self::CompleteForward | Self::CompleteReverse)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgressForward => "in progress",
            Self::CompleteForward => "complete",
            Self::InProgressReverse => "reverting",
            Self::CompleteReverse => "reverted",
        }
    }
}

impl Migration {
    pub fn status(&self) -> MigrationStatus {
        MigrationStatus::from_progress(self.progress, self.apply_reverse)
    }

    pub fn complete(&self) -> bool {
        self.status().is_complete()
    }

    pub fn last_error(&self) -> Option<&MigrationError> {
        self.errors.first()
    }
}
