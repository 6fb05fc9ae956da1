use crate::config::ClientConfig;
use anyhow::{Context, Result};
use chrono::Local;
use conntime_metrics::records::{Encoding, XmlSink};
use conntime_metrics::ResultCollector;
use conntime_net::{BurstScheduler, ConnectionWorker, RunSummary};
use slog::{info, warn};
use std::fs::File;
use std::io::BufWriter;
use tokio::net::TcpStream;
use tokio::task;
use tokio_util::sync::CancellationToken;

/// Run the whole burst plan against the configured server, then drain the
/// workers and finalize every result sink.
pub async fn run(config: &ClientConfig, cancel: CancellationToken, logger: slog::Logger) -> Result<RunSummary> {
    let path = config.result_path(&Local::now());
    let file = File::create(&path).with_context(|| format!("could not create result file {}", path.display()))?;
    let sink = Encoding::from_path(&path).sink(BufWriter::new(file))?;
    let results = ResultCollector::spawn("file", sink, logger.clone())?;
    info!(logger, "writing results"; "file" => %path.display());

    let mut worker = ConnectionWorker::new(config.target(), logger.clone());
    worker.add_collector(results.handle());
    let live = match &config.live_server {
        Some((host, port)) => connect_live(host, *port, &logger).await,
        None => None,
    };
    if let Some(live) = &live {
        worker.add_collector(live.handle());
    }

    let scheduler = BurstScheduler::new(config.schedule(), worker, logger.clone());
    let summary = scheduler.run(&cancel).await;
    info!(logger, "burst plan done";
        "terms" => summary.terms.len(),
        "connections" => summary.connections(),
        "cancelled" => summary.cancelled);
    if !scheduler.drain(config.drain_timeout).await {
        warn!(logger, "finalizing results while workers are still running";
            "in_flight" => scheduler.in_flight());
    }

    if let Some(live) = live {
        match task::spawn_blocking(move || live.shutdown()).await? {
            Ok(written) => info!(logger, "live sink closed"; "written" => written),
            Err(e) => warn!(logger, "live sink failed"; "error" => %e),
        }
    }
    let written = task::spawn_blocking(move || results.shutdown()).await??;
    info!(logger, "result file closed"; "file" => %path.display(), "written" => written);
    Ok(summary)
}

async fn connect_live(host: &str, port: u16, logger: &slog::Logger) -> Option<ResultCollector> {
    let attempt = async {
        let stream = TcpStream::connect((host, port)).await?.into_std()?;
        stream.set_nonblocking(false)?;
        let sink = XmlSink::new(stream)?;
        ResultCollector::spawn("live", sink, logger.clone())
    };
    match attempt.await {
        Ok(collector) => {
            info!(logger, "streaming results to live viewer"; "host" => host, "port" => port);
            Some(collector)
        }
        Err(e) => {
            warn!(logger, "live viewer unreachable, continuing without it";
                "host" => host, "port" => port, "error" => %e);
            None
        }
    }
}
