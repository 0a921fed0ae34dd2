use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::LazyLock;

use oobmig_common::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Last minor version of each major release that has a successor major.
/// `next()` and `previous()` wrap across these boundaries.
const LAST_MINOR_VERSIONS: &[(u32, u32)] = &[(3, 43), (4, 5)];

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?(\d+)\.(\d+)(?:\.(\d+))?(?:-[^+]*)?(\+dev)?$").expect("valid version regex")
});

/// A product version at minor-release granularity.
///
/// Equality, ordering and hashing only consider `(major, minor)`; `dev` is
/// carried along for display.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub dev: bool,
}

/// Relative order of two versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOrder {
    Before,
    Equal,
    After,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            dev: false,
        }
    }

    /// Parse a version string, returning the patch component separately.
    ///
    /// Accepts `3.50`, `v3.50.3`, `3.50.0-rc.1` and `3.50.0+dev`.
    pub fn parse_with_patch(s: &str) -> Option<(Self, u32)> {
        let caps = VERSION_PATTERN.captures(s.trim())?;
        let major = caps.get(1)?.as_str().parse().ok()?;
        let minor = caps.get(2)?.as_str().parse().ok()?;
        let patch = match caps.get(3) {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };
        let version = Self {
            major,
            minor,
            dev: caps.get(4).is_some(),
        };
        Some((version, patch))
    }

    /// The version immediately after this one, or `None` when the number
    /// space is exhausted.
    pub fn next(self) -> Option<Self> {
        match last_minor_of(self.major) {
            Some(last) if self.minor == last => Some(Self::new(self.major.checked_add(1)?, 0)),
            _ => Some(Self::new(self.major, self.minor.checked_add(1)?)),
        }
    }

    /// The version immediately before this one, or `None` at the oldest
    /// version reachable through the release table.
    pub fn previous(self) -> Option<Self> {
        if self.minor > 0 {
            return Some(Self::new(self.major, self.minor - 1));
        }
        let prior_major = self.major.checked_sub(1)?;
        last_minor_of(prior_major).map(|last| Self::new(prior_major, last))
    }

    pub fn git_tag(&self) -> String {
        format!("v{}.{}.0", self.major, self.minor)
    }
}

fn last_minor_of(major: u32) -> Option<u32> {
    LAST_MINOR_VERSIONS
        .iter()
        .find(|(m, _)| *m == major)
        .map(|(_, last)| *last)
}

pub fn compare(a: Version, b: Version) -> VersionOrder {
    match a.cmp(&b) {
        Ordering::Less => VersionOrder::Before,
        Ordering::Equal => VersionOrder::Equal,
        Ordering::Greater => VersionOrder::After,
    }
}

/// Every version from `from` through `to`, inclusive. Errors unless `from < to`.
pub fn upgrade_range(from: Version, to: Version) -> Result<Vec<Version>> {
    if from >= to {
        return Err(Error::Version(format!(
            "invalid range (from={from} >= to={to})"
        )));
    }

    let mut versions = vec![from];
    let mut current = from;
    while current < to {
        current = current
            .next()
            .ok_or_else(|| Error::Version(format!("no version after {current}")))?;
        versions.push(current);
    }
    Ok(versions)
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor).cmp(&(other.major, other.minor))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if self.dev {
            f.write_str("+dev")?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_with_patch(s)
            .map(|(version, _)| version)
            .ok_or_else(|| Error::Version(format!("failed to parse version {s:?}")))
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}
