use crate::measurement::{Measurement, Metric};
use crate::timestamp::{duration_millis, truncate_to_minute, Timestamp};
use chrono::Duration;
use std::collections::BTreeMap;

pub type Partitions = BTreeMap<Timestamp, Vec<Measurement>>;

/// Bucket key for one-minute windows.
pub fn by_minute(m: &Measurement) -> Option<Timestamp> {
    m.start().map(|s| truncate_to_minute(&s))
}

/// Group measurements by the key returned from `bucket_key`. Measurements
/// without a key (no start instant) cannot be placed and are left out.
pub fn partition<I, F>(data: I, bucket_key: F) -> Partitions
where
    I: IntoIterator<Item = Measurement>,
    F: Fn(&Measurement) -> Option<Timestamp>,
{
    let mut partitions = Partitions::new();
    for m in data {
        if let Some(key) = bucket_key(&m) {
            partitions.entry(key).or_insert_with(Vec::new).push(m);
        }
    }
    partitions
}

/// Summary of one metric over one bucket. All values are milliseconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatisticSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub drops: u64,
}

impl StatisticSummary {
    pub fn percentiles(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("p50", self.p50),
            ("p75", self.p75),
            ("p90", self.p90),
            ("p95", self.p95),
            ("p99", self.p99),
        ]
    }
}

// Truncating index without interpolation. Existing result sets were evaluated
// with exactly this formula, keep it.
fn percentile(sorted: &[f64], pct: usize) -> f64 {
    sorted[sorted.len() * pct / 100]
}

pub fn summarize(bucket: &[Measurement], metric: Metric) -> StatisticSummary {
    summarize_with(bucket, |m| m.metric(metric))
}

pub fn summarize_with<F>(bucket: &[Measurement], select: F) -> StatisticSummary
where
    F: Fn(&Measurement) -> Option<Duration>,
{
    let mut drops = 0;
    let mut values = Vec::with_capacity(bucket.len());
    for m in bucket {
        match select(m) {
            Some(d) => values.push(duration_millis(&d) as f64),
            None => drops += 1,
        }
    }
    if values.is_empty() {
        return StatisticSummary {
            drops,
            ..StatisticSummary::default()
        };
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let average = values.iter().sum::<f64>() / values.len() as f64;
    StatisticSummary {
        count: values.len(),
        min: values[0],
        max: values[values.len() - 1],
        average,
        p50: percentile(&values, 50),
        p75: percentile(&values, 75),
        p90: percentile(&values, 90),
        p95: percentile(&values, 95),
        p99: percentile(&values, 99),
        drops,
    }
}

pub fn calculate_statistics(
    partitions: &Partitions,
    metric: Metric,
) -> BTreeMap<Timestamp, StatisticSummary> {
    partitions
        .iter()
        .map(|(k, bucket)| (*k, summarize(bucket, metric)))
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropCounts {
    pub connect: u64,
    pub server: u64,
    pub latency: u64,
    pub response: u64,
}

impl DropCounts {
    pub fn get(&self, metric: Metric) -> u64 {
        match metric {
            Metric::ConnectTime => self.connect,
            Metric::ServerReceiveTime => self.server,
            Metric::Latency => self.latency,
            Metric::ResponseTime => self.response,
        }
    }
}

pub fn count_drops(bucket: &[Measurement]) -> DropCounts {
    let drops = |metric: Metric| bucket.iter().filter(|m| m.metric(metric).is_none()).count() as u64;
    DropCounts {
        connect: drops(Metric::ConnectTime),
        server: drops(Metric::ServerReceiveTime),
        latency: drops(Metric::Latency),
        response: drops(Metric::ResponseTime),
    }
}

pub fn calculate_drops(partitions: &Partitions) -> BTreeMap<Timestamp, DropCounts> {
    partitions
        .iter()
        .map(|(k, bucket)| (*k, count_drops(bucket)))
        .collect()
}
