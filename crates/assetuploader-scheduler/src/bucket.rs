//! Time buckets used to partition the job store.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Job;

/// Granularity of the time buckets jobs are grouped into.
///
/// Coarser buckets mean fewer partitions; a query always includes every job
/// in any bucket whose key is at or before the query's key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketGranularity {
    Millis,
    Seconds,
    #[default]
    Minutes,
}

impl BucketGranularity {
    /// Bucket key for a date: its Unix timestamp in milliseconds, truncated
    /// to this granularity.
    pub fn key(&self, date: DateTime<Utc>) -> i64 {
        let millis = date.timestamp_millis();
        let step = match self {
            BucketGranularity::Millis => 1,
            BucketGranularity::Seconds => 1_000,
            BucketGranularity::Minutes => 60_000,
        };
        millis.div_euclid(step) * step
    }
}

impl fmt::Display for BucketGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BucketGranularity::Millis => "millis",
            BucketGranularity::Seconds => "seconds",
            BucketGranularity::Minutes => "minutes",
        })
    }
}

impl FromStr for BucketGranularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "millis" | "ms" => Ok(BucketGranularity::Millis),
            "seconds" | "s" => Ok(BucketGranularity::Seconds),
            "minutes" | "m" => Ok(BucketGranularity::Minutes),
            other => Err(format!(
                "invalid bucket granularity '{}', expected millis/seconds/minutes",
                other
            )),
        }
    }
}

/// Ordered set of time buckets. Owned exclusively by the store loop.
pub(crate) struct Buckets {
    granularity: BucketGranularity,
    buckets: BTreeMap<i64, HashMap<String, Job>>,
    /// Which bucket currently holds each job id.
    index: HashMap<String, i64>,
}

impl Buckets {
    pub(crate) fn new(granularity: BucketGranularity) -> Self {
        Self {
            granularity,
            buckets: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    /// Insert or replace a job. Returns true if a new bucket was created.
    pub(crate) fn upsert(&mut self, job: Job) -> bool {
        let key = self.granularity.key(job.execution_date());

        // An id lives in exactly one bucket
        if let Some(previous) = self.index.insert(job.id().to_string(), key) {
            if previous != key {
                self.remove_from_bucket(previous, job.id());
            }
        }

        let created = !self.buckets.contains_key(&key);
        self.buckets
            .entry(key)
            .or_default()
            .insert(job.id().to_string(), job);
        created
    }

    /// All jobs in buckets at or before the bucket of `before` that match
    /// the predicate.
    pub(crate) fn query(
        &self,
        before: DateTime<Utc>,
        predicate: &dyn Fn(&Job) -> bool,
    ) -> Vec<Job> {
        let key = self.granularity.key(before);
        self.buckets
            .range(..=key)
            .flat_map(|(_, jobs)| jobs.values())
            .filter(|job| predicate(job))
            .cloned()
            .collect()
    }

    fn remove_from_bucket(&mut self, key: i64, id: &str) {
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.remove(id);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn job_count(&self) -> usize {
        self.index.len()
    }
}
