mod collector;
mod live;
mod measurement;
mod reader;
mod sink;
mod statistics;
mod timestamp;

pub use self::collector::{CollectorError, CollectorHandle, Record, ResultCollector, SubmitError};
pub use self::measurement::{Measurement, MeasurementBuilder, Metric};
pub use self::timestamp::{duration_millis, format_instant, parse_instant, truncate_to_minute, Timestamp};
pub mod stats {
    pub use crate::live::{BucketStatistics, LiveAggregator, PartialAverages};
    pub use crate::statistics::{
        by_minute, calculate_drops, calculate_statistics, count_drops, partition, summarize,
        summarize_with, DropCounts, Partitions, StatisticSummary,
    };
}
pub mod records {
    pub use crate::reader::{read_records, read_results, ReadError, RecordParser, ResultBuffer};
    pub use crate::sink::{DelimitedSink, Encoding, RecordSink, XmlSink};
}
