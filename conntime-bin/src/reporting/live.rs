use super::BucketView;
use crate::config::ReportConfig;
use anyhow::{Context, Result};
use conntime_metrics::records::{Encoding, RecordParser, ResultBuffer};
use conntime_metrics::stats::LiveAggregator;
use conntime_metrics::Metric;
use slog::{debug, info, o, warn};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Running per-minute statistics over everything streamed in by clients.
pub struct LiveView {
    buffer: ResultBuffer,
    aggregator: LiveAggregator,
    logger: slog::Logger,
}

impl LiveView {
    pub fn new(logger: slog::Logger) -> LiveView {
        LiveView {
            buffer: ResultBuffer::new(),
            aggregator: LiveAggregator::new(),
            logger,
        }
    }

    pub fn buffer(&self) -> ResultBuffer {
        self.buffer.clone()
    }

    /// Fold in the records received since the last update. Returns the
    /// rendered buckets that changed.
    pub fn update(&mut self) -> Vec<String> {
        let batch = self.buffer.take_intermediate();
        if batch.is_empty() {
            return Vec::new();
        }
        let received = batch.len();
        let averages = self.aggregator.add_partial(batch);
        info!(self.logger, "new results";
            "count" => received,
            "connect_ms" => ?averages.get(Metric::ConnectTime),
            "server_ms" => ?averages.get(Metric::ServerReceiveTime),
            "latency_ms" => ?averages.get(Metric::Latency),
            "response_ms" => ?averages.get(Metric::ResponseTime));

        let updated = self.aggregator.aggregate();
        let buckets = self.aggregator.buckets();
        updated
            .iter()
            .map(|(start, stats)| {
                BucketView {
                    start,
                    samples: buckets.get(start).map(Vec::len).unwrap_or(0),
                    stats,
                }
                .to_string()
            })
            .collect()
    }
}

/// Parse records line by line from a live sink stream into `buffer` until the
/// stream ends. Returns the number of records read.
pub async fn feed<R>(input: R, buffer: ResultBuffer, logger: &slog::Logger) -> io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut parser = RecordParser::new(Encoding::Xml);
    let mut lines = input.lines();
    let mut records = 0;
    while let Some(line) = lines.next_line().await? {
        match parser.parse_line(&line) {
            Ok(Some(m)) => {
                buffer.push(m);
                records += 1;
            }
            Ok(None) => {}
            Err(e) => warn!(logger, "skipping unreadable record"; "error" => %e),
        }
    }
    Ok(records)
}

pub async fn run(config: &ReportConfig, cancel: CancellationToken, logger: slog::Logger) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.live_port))
        .await
        .with_context(|| format!("could not listen on port {}", config.live_port))?;
    info!(logger, "waiting for live results"; "port" => config.live_port);

    let mut view = LiveView::new(logger.clone());
    let mut ticker = time::interval_at(time::Instant::now() + config.aggregate_interval, config.aggregate_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let logger = logger.new(o!("peer" => peer.to_string()));
                    let buffer = view.buffer();
                    info!(logger, "client connected");
                    tokio::spawn(async move {
                        match feed(BufReader::new(stream), buffer, &logger).await {
                            Ok(records) => info!(logger, "client finished"; "records" => records),
                            Err(e) => warn!(logger, "client stream failed"; "error" => %e),
                        }
                    });
                }
                Err(e) => {
                    warn!(logger, "accept failed"; "error" => %e);
                    time::sleep(Duration::from_millis(50)).await;
                }
            },
            _ = ticker.tick() => print_updates(&mut view),
        }
    }
    debug!(logger, "publishing remaining results");
    print_updates(&mut view);
    Ok(())
}

fn print_updates(view: &mut LiveView) {
    for bucket in view.update() {
        println!("{}", bucket);
    }
}
