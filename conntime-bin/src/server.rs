use crate::config::ServerConfig;
use anyhow::{Context, Result};
use conntime_net::{Acceptor, RequestHandler};
use slog::{info, o};
use tokio_util::sync::CancellationToken;

pub async fn run(config: &ServerConfig, cancel: CancellationToken, logger: slog::Logger) -> Result<()> {
    let handler = RequestHandler::new(config.payload_size, logger.new(o!("component" => "handler")))
        .with_limits(config.max_request_bytes, config.read_timeout);
    let acceptor = Acceptor::bind(("0.0.0.0", config.port), handler, logger.clone())
        .await
        .with_context(|| format!("could not listen on port {}", config.port))?;
    match config.payload_size {
        Some(size) => info!(logger, "replying with fixed payloads"; "bytes" => size),
        None => info!(logger, "echoing request payloads"),
    }
    acceptor.run(cancel).await;
    Ok(())
}
