use crate::measurement::{Measurement, Metric};
use crate::statistics::{by_minute, partition, summarize, Partitions, StatisticSummary};
use crate::timestamp::{duration_millis, Timestamp};
use std::collections::BTreeMap;

pub type BucketStatistics = BTreeMap<Metric, StatisticSummary>;

/// Running per-minute statistics over data that arrives in pieces.
///
/// Partial data is queued with `add_partial` and folded in by `aggregate`,
/// which only recomputes the buckets that received new samples. Not
/// synchronized; meant to be driven by a single reporting task.
#[derive(Debug, Default)]
pub struct LiveAggregator {
    collected: Partitions,
    pending: Vec<Measurement>,
}

/// Average of each metric over one delivered batch, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialAverages {
    averages: BTreeMap<Metric, f64>,
}

impl PartialAverages {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.averages.get(&metric).copied()
    }
}

impl LiveAggregator {
    pub fn new() -> LiveAggregator {
        LiveAggregator::default()
    }

    pub fn add_partial(&mut self, data: Vec<Measurement>) -> PartialAverages {
        let mut averages = BTreeMap::new();
        for metric in Metric::all() {
            let values: Vec<f64> = data
                .iter()
                .filter_map(|m| m.metric(*metric))
                .map(|d| duration_millis(&d) as f64)
                .collect();
            if !values.is_empty() {
                let avg = values.iter().sum::<f64>() / values.len() as f64;
                averages.insert(*metric, avg);
            }
        }
        self.pending.extend(data);
        PartialAverages { averages }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Merge pending samples into their buckets and return fresh statistics
    /// for every bucket that changed.
    pub fn aggregate(&mut self) -> BTreeMap<Timestamp, BucketStatistics> {
        let pending = std::mem::replace(&mut self.pending, Vec::new());
        let fresh = partition(pending, by_minute);
        let mut updated = BTreeMap::new();
        for (key, samples) in fresh {
            let bucket = self.collected.entry(key).or_insert_with(Vec::new);
            bucket.extend(samples);
            let stats = Metric::all()
                .iter()
                .map(|metric| (*metric, summarize(bucket, *metric)))
                .collect();
            updated.insert(key, stats);
        }
        updated
    }

    pub fn buckets(&self) -> &Partitions {
        &self.collected
    }
}
