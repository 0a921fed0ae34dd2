//! Planning of multi-version upgrade and downgrade campaigns.
//!
//! Every migration is active on `[introduced, deprecated)`. Crossing
//! `deprecated` on the way up requires the migration to have finished forward;
//! crossing `introduced` on the way down requires it to have been fully
//! reverted. The scheduler picks the fewest versions at which a campaign has
//! to pause so that each affected migration can be driven to completion while
//! the running instance still understands it.

use std::collections::BTreeMap;

use oobmig_common::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::definitions::{self, MigrationDefinition};
use crate::version::{Version, VersionOrder, compare};

/// A version at which a campaign must wait for the listed migrations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationInterrupt {
    pub version: Version,
    pub migration_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy)]
struct MigrationInterval {
    id: i64,
    introduced: Version,
    deprecated: Version,
}

impl MigrationInterval {
    fn new(id: i64, introduced: Version, deprecated: Version) -> Result<Self> {
        if deprecated <= introduced {
            return Err(Error::Schedule(format!(
                "migration {id} has an empty active interval [{introduced}, {deprecated})"
            )));
        }
        Ok(Self {
            id,
            introduced,
            deprecated,
        })
    }

    fn contains(&self, point: Version) -> bool {
        self.introduced <= point && point < self.deprecated
    }
}

/// Interrupts for moving from `from` to `to` using the embedded definitions.
pub fn schedule_migration_interrupts(
    from: Version,
    to: Version,
) -> Result<Vec<MigrationInterrupt>> {
    schedule_interrupts(from, to, &definitions::embedded()?)
}

/// Interrupts for moving from `from` to `to`, in traversal order.
pub fn schedule_interrupts(
    from: Version,
    to: Version,
    definitions: &[MigrationDefinition],
) -> Result<Vec<MigrationInterrupt>> {
    match compare(from, to) {
        VersionOrder::Before => schedule_upgrade(from, to, definitions),
        VersionOrder::After => schedule_downgrade(from, to, definitions),
        VersionOrder::Equal => Ok(Vec::new()),
    }
}

fn schedule_upgrade(
    from: Version,
    to: Version,
    definitions: &[MigrationDefinition],
) -> Result<Vec<MigrationInterrupt>> {
    // Migrations still open at `to` impose nothing on an upgrade.
    let mut intervals = Vec::new();
    for def in definitions {
        let Some(deprecated) = def.deprecated else {
            continue;
        };
        if from < deprecated && deprecated <= to {
            intervals.push(MigrationInterval::new(def.id, def.introduced, deprecated)?);
        }
    }
    intervals.sort_by_key(|i| (i.deprecated, i.id));

    let mut points: Vec<Version> = Vec::new();
    for interval in &intervals {
        if points.last().is_some_and(|&p| interval.contains(p)) {
            continue;
        }
        let point = interval.deprecated.previous().ok_or_else(|| {
            Error::Schedule(format!(
                "cannot determine version prior to {} (migration {})",
                interval.deprecated, interval.id
            ))
        })?;
        points.push(point);
    }

    Ok(assign(&intervals, &points, false))
}

fn schedule_downgrade(
    from: Version,
    to: Version,
    definitions: &[MigrationDefinition],
) -> Result<Vec<MigrationInterrupt>> {
    // Nothing introduced at or before `to` needs reverting.
    let mut intervals = Vec::new();
    for def in definitions {
        if to < def.introduced && def.introduced <= from {
            let deprecated = match def.deprecated {
                Some(deprecated) => deprecated,
                None => from.next().ok_or_else(|| {
                    Error::Schedule(format!("cannot determine version after {from}"))
                })?,
            };
            intervals.push(MigrationInterval::new(def.id, def.introduced, deprecated)?);
        }
    }
    intervals.sort_by_key(|i| (std::cmp::Reverse(i.introduced), i.id));

    let mut points: Vec<Version> = Vec::new();
    for interval in &intervals {
        if points.last().is_some_and(|&p| interval.contains(p)) {
            continue;
        }
        points.push(interval.introduced);
    }

    Ok(assign(&intervals, &points, true))
}

/// Attribute each interval to the covering point reached last during the
/// traversal, then order interrupts for the traversal direction.
///
/// `points` are in generation order, which is the reverse of "reached last
/// first" for both directions.
fn assign(
    intervals: &[MigrationInterval],
    points: &[Version],
    descending: bool,
) -> Vec<MigrationInterrupt> {
    let mut by_point: BTreeMap<Version, Vec<i64>> = BTreeMap::new();
    for interval in intervals {
        let Some(&point) = points.iter().rev().find(|&&p| interval.contains(p)) else {
            panic!(
                "migration {} [{}, {}) is not covered by any chosen interrupt",
                interval.id, interval.introduced, interval.deprecated
            );
        };
        by_point.entry(point).or_default().push(interval.id);
    }

    let mut interrupts: Vec<MigrationInterrupt> = by_point
        .into_iter()
        .map(|(version, mut migration_ids)| {
            migration_ids.sort_unstable();
            MigrationInterrupt {
                version,
                migration_ids,
            }
        })
        .collect();
    if descending {
        interrupts.reverse();
    }
    interrupts
}
