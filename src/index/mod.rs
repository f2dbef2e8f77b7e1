// Secondary index lookups: a request is planned into one index prefix per
// constraint, each prefix is scanned over the same time range, and the
// resulting ascending lists are intersected.

use crate::{
    error::{Error, Result},
    keys::IndexEntry,
    kv::Snapshot,
};

pub mod merge;
pub mod plan;
pub mod scan;

pub use plan::{plan, FindProfilesRequest, QueryPlan};
pub use scan::{scan_index, IndexScan};

// Inclusive bounds on creation time, nanoseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub min: u64,
    pub max: u64,
}

impl TimeRange {
    pub fn new(min: u64, max: u64) -> Self {
        TimeRange { min, max }
    }

    pub fn all() -> Self {
        TimeRange {
            min: 0,
            max: u64::MAX,
        }
    }
}

// Every prefix is scanned in the one snapshot passed in, so all lists reflect
// the same point in time.
pub fn find<S: Snapshot>(snapshot: &S, req: &FindProfilesRequest) -> Result<Vec<IndexEntry>> {
    let plan = plan(req)?;

    let mut lists = Vec::with_capacity(plan.prefixes.len());
    for prefix in &plan.prefixes {
        let scan = scan_index(snapshot, prefix, plan.range).map_err(|e| {
            Error::store(
                format!(
                    "scanning {:?} index {:?}",
                    prefix.kind(),
                    String::from_utf8_lossy(prefix.index_value())
                ),
                e,
            )
        })?;
        lists.push(scan.collect::<Vec<_>>());
    }

    let found = merge::intersect(lists, plan.limit);
    if found.is_empty() {
        return Err(Error::NotFound(format!("no profiles for {}", req)));
    }
    for entry in &found {
        tracing::debug!(pid = %entry.id, created_at = entry.created_at, "found profile");
    }
    Ok(found)
}
