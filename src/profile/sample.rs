use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::BoxError;

use super::Profile;

// A minimal mergeable payload: sample counts keyed by stack, serialized as
// JSON. Merging keeps the earliest creation time, adds up durations and sums
// the counts per stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleProfile {
    pub time_nanos: u64,
    pub duration_nanos: u64,
    pub samples: BTreeMap<String, i64>,
}

impl SampleProfile {
    pub fn new(time_nanos: u64) -> Self {
        SampleProfile {
            time_nanos,
            ..Default::default()
        }
    }

    pub fn with_sample(mut self, stack: impl Into<String>, count: i64) -> Self {
        *self.samples.entry(stack.into()).or_insert(0) += count;
        self
    }
}

impl Profile for SampleProfile {
    fn time_nanos(&self) -> u64 {
        self.time_nanos
    }

    fn encode(&self) -> Result<Vec<u8>, BoxError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(buf: &[u8]) -> Result<Self, BoxError> {
        Ok(serde_json::from_slice(buf)?)
    }

    fn merge(profiles: Vec<Self>) -> Result<Self, BoxError> {
        let mut profiles = profiles.into_iter();
        let mut merged = profiles.next().ok_or("no profiles to merge")?;
        for p in profiles {
            merged.time_nanos = merged.time_nanos.min(p.time_nanos);
            merged.duration_nanos = merged
                .duration_nanos
                .checked_add(p.duration_nanos)
                .ok_or("duration overflow")?;
            for (stack, count) in p.samples {
                let total = merged.samples.entry(stack).or_insert(0);
                *total = total.checked_add(count).ok_or("sample count overflow")?;
            }
        }
        Ok(merged)
    }
}
