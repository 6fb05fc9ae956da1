use crate::framing::{encode_request, parse_server_received};
use crate::transport::Connection;
use chrono::Utc;
use conntime_metrics::{CollectorHandle, Measurement, Timestamp};
use slog::{debug, info, o, trace};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub payload_size: Option<usize>,
}

/// Performs one timed round trip per call and hands the result to every
/// registered collector.
pub struct ConnectionWorker {
    target: Target,
    collectors: Vec<CollectorHandle>,
    logger: slog::Logger,
}

impl ConnectionWorker {
    pub fn new(target: Target, logger: slog::Logger) -> ConnectionWorker {
        let logger = logger.new(o!("target" => format!("{}:{}", target.host, target.port)));
        ConnectionWorker {
            target,
            collectors: Vec::new(),
            logger,
        }
    }

    pub fn with_collector(target: Target, collector: CollectorHandle, logger: slog::Logger) -> ConnectionWorker {
        let mut worker = ConnectionWorker::new(target, logger);
        worker.add_collector(collector);
        worker
    }

    pub fn add_collector(&mut self, collector: CollectorHandle) {
        self.collectors.push(collector);
    }

    /// Measure once and hand the measurement off.
    pub async fn run(&self) {
        let m = self.measure().await;
        self.hand_off(m);
    }

    pub async fn measure(&self) -> Measurement {
        let start = Utc::now();
        match TcpStream::connect((self.target.host.as_str(), self.target.port)).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                self.measure_with(start, Connection::Tcp(stream)).await
            }
            Err(e) => {
                info!(self.logger, "connection failed"; "error" => %e);
                Measurement::builder().start(start).build()
            }
        }
    }

    /// Run the exchange over an established connection. `start` is when the
    /// connection attempt began; the connect instant is taken on entry.
    pub async fn measure_with(&self, start: Timestamp, mut conn: Connection) -> Measurement {
        let connected = Utc::now();
        let mut builder = Measurement::builder().start(start).connected(connected);

        let request = encode_request(&connected, self.target.payload_size);
        let written = async {
            conn.write_all(&request).await?;
            conn.flush().await
        }
        .await;
        if let Err(e) = written {
            info!(self.logger, "could not send request"; "error" => %e);
            close(&mut conn, &self.logger).await;
            return builder.build();
        }

        let mut response = Vec::new();
        let mut chunk = [0u8; 1024];
        let mut first_seen = false;
        loop {
            match conn.read(&mut chunk).await {
                Ok(0) => {
                    builder = builder.completed(Utc::now());
                    break;
                }
                Ok(n) => {
                    if !first_seen {
                        first_seen = true;
                        builder = builder.first_response(Utc::now());
                    }
                    response.extend_from_slice(&chunk[..n]);
                }
                Err(e) => {
                    info!(self.logger, "could not read response"; "error" => %e);
                    break;
                }
            }
        }

        match parse_server_received(&response) {
            Ok(t) => builder = builder.server_received(t),
            Err(e) => info!(self.logger, "could not parse response"; "error" => %e),
        }
        close(&mut conn, &self.logger).await;

        let m = builder.build();
        trace!(self.logger, "measured";
            "connect" => ?m.connect_time(),
            "server" => ?m.server_receive_time(),
            "latency" => ?m.latency(),
            "response" => ?m.response_time());
        m
    }

    /// Submit to each collector in registration order; the first refusal ends
    /// the hand-off.
    pub fn hand_off(&self, m: Measurement) {
        for collector in &self.collectors {
            if let Err(e) = collector.submit(m.clone()) {
                info!(self.logger, "result hand-off interrupted";
                    "collector" => collector.name(), "error" => %e);
                return;
            }
        }
    }
}

async fn close(conn: &mut Connection, logger: &slog::Logger) {
    if let Err(e) = conn.close().await {
        debug!(logger, "ignoring error during close"; "error" => %e);
    }
}
