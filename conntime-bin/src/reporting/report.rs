use super::BucketView;
use conntime_metrics::records::{read_results, ReadError};
use conntime_metrics::stats::{by_minute, calculate_drops, partition, summarize, BucketStatistics, DropCounts};
use conntime_metrics::{Measurement, Metric, Timestamp};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};

struct Bucket {
    samples: usize,
    stats: BucketStatistics,
    drops: DropCounts,
}

/// Per-minute statistics of a finished run.
pub struct FileReport {
    source: PathBuf,
    records: usize,
    buckets: BTreeMap<Timestamp, Bucket>,
}

impl FileReport {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<FileReport, ReadError> {
        let records = read_results(path.as_ref())?;
        Ok(FileReport::from_records(path.as_ref(), records))
    }

    pub fn from_records(source: &Path, records: Vec<Measurement>) -> FileReport {
        let count = records.len();
        let partitions = partition(records, by_minute);
        let mut drops = calculate_drops(&partitions);
        let buckets = partitions
            .iter()
            .map(|(key, bucket)| {
                let stats = Metric::all()
                    .iter()
                    .map(|metric| (*metric, summarize(bucket, *metric)))
                    .collect();
                let b = Bucket {
                    samples: bucket.len(),
                    stats,
                    drops: drops.remove(key).unwrap_or_default(),
                };
                (*key, b)
            })
            .collect();
        FileReport {
            source: source.to_path_buf(),
            records: count,
            buckets,
        }
    }

    pub fn minutes(&self) -> usize {
        self.buckets.len()
    }

    /// Records left out of every bucket because they never started.
    pub fn unbucketed(&self) -> usize {
        self.records - self.buckets.values().map(|b| b.samples).sum::<usize>()
    }
}

impl Display for FileReport {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(
            f,
            "{}: {} records in {} minutes",
            self.source.display(),
            self.records,
            self.minutes()
        )?;
        if self.unbucketed() > 0 {
            write!(f, " ({} without a start instant)", self.unbucketed())?;
        }
        for (start, bucket) in &self.buckets {
            let view = BucketView {
                start,
                samples: bucket.samples,
                stats: &bucket.stats,
            };
            write!(f, "\n{}", view)?;
            write!(f, "\n    Drops:")?;
            for metric in Metric::all() {
                write!(f, " {} {}", metric.label(), bucket.drops.get(*metric))?;
            }
        }
        Ok(())
    }
}
