pub mod live;
pub mod report;

use conntime_metrics::stats::{BucketStatistics, StatisticSummary};
use conntime_metrics::{format_instant, Metric, Timestamp};
use std::fmt::{Display, Formatter, Result as FmtResult};

fn fmt_millis(ms: f64) -> String {
    if ms.abs() >= 5000.0 {
        format!("{:.3}s", ms / 1000.0)
    } else {
        format!("{:.0}ms", ms)
    }
}

pub fn format_summary(s: &StatisticSummary) -> String {
    if s.count == 0 {
        return format!("count 0/drops {}", s.drops);
    }
    let mut out = format!(
        "count {}/min {}/avg {}/max {}",
        s.count,
        fmt_millis(s.min),
        fmt_millis(s.average),
        fmt_millis(s.max)
    );
    for (name, value) in s.percentiles() {
        out.push_str(&format!("/{} {}", name, fmt_millis(value)));
    }
    out.push_str(&format!("/drops {}", s.drops));
    out
}

/// Every metric's summary for one minute bucket.
pub struct BucketView<'a> {
    pub start: &'a Timestamp,
    pub samples: usize,
    pub stats: &'a BucketStatistics,
}

impl<'a> Display for BucketView<'a> {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "* {} ({} samples)", format_instant(self.start), self.samples)?;
        for metric in Metric::all() {
            if let Some(s) = self.stats.get(metric) {
                write!(f, "\n    {}: {}", metric.label(), format_summary(s))?;
            }
        }
        Ok(())
    }
}
