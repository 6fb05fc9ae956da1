use crate::framing::{build_reply, FrameError, FrameReader, DEFAULT_MAX_REQUEST};
use crate::transport::Connection;
use chrono::Utc;
use conntime_metrics::Timestamp;
use slog::{debug, trace, warn};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};

/// How long a peer may take to deliver its request by default.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("no complete request within {0:?}")]
    TimedOut(Duration),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug)]
enum State {
    AwaitingRequest,
    Parsing { body: Vec<u8>, received: Timestamp },
    Replying { reply: Vec<u8> },
    Closed,
}

/// Serves a single timestamp-echo exchange per connection.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    payload_size: Option<usize>,
    max_request: usize,
    read_timeout: Duration,
    logger: slog::Logger,
}

impl RequestHandler {
    /// Without a payload size the request body is echoed back, otherwise a
    /// random payload of that size is sent.
    pub fn new(payload_size: Option<usize>, logger: slog::Logger) -> RequestHandler {
        RequestHandler {
            payload_size,
            max_request: DEFAULT_MAX_REQUEST,
            read_timeout: DEFAULT_READ_TIMEOUT,
            logger,
        }
    }

    /// Bound the request body size and the time allowed to receive it.
    pub fn with_limits(mut self, max_request: usize, read_timeout: Duration) -> RequestHandler {
        self.max_request = max_request;
        self.read_timeout = read_timeout;
        self
    }

    /// Read one request, reply, and close. Malformed, oversized and overdue
    /// requests are closed without any reply.
    pub async fn handle(&self, mut conn: Connection) -> Result<(), HandlerError> {
        let result = self.exchange(&mut conn).await;
        if let Err(e) = conn.close().await {
            debug!(self.logger, "ignoring error during close"; "error" => %e);
        }
        result
    }

    async fn exchange(&self, conn: &mut Connection) -> Result<(), HandlerError> {
        let mut state = State::AwaitingRequest;
        let mut frames = FrameReader::with_limit(self.max_request);
        let mut chunk = [0u8; 1024];
        let deadline = Instant::now() + self.read_timeout;
        loop {
            state = match state {
                State::AwaitingRequest => {
                    let n = match timeout_at(deadline, conn.read(&mut chunk)).await {
                        Ok(read) => read?,
                        Err(_) => {
                            debug!(self.logger, "request deadline passed";
                                "buffered" => frames.buffered());
                            return Err(HandlerError::TimedOut(self.read_timeout));
                        }
                    };
                    if n == 0 {
                        debug!(self.logger, "connection closed before request was complete";
                            "buffered" => frames.buffered());
                        return Err(FrameError::Incomplete.into());
                    }
                    match frames.push(&chunk[..n]) {
                        Ok(Some(body)) => State::Parsing {
                            body,
                            received: Utc::now(),
                        },
                        Ok(None) => State::AwaitingRequest,
                        Err(e) => {
                            warn!(self.logger, "rejecting request"; "error" => %e);
                            return Err(e.into());
                        }
                    }
                }
                State::Parsing { body, received } => {
                    trace!(self.logger, "request read"; "bytes" => body.len());
                    match build_reply(&body, &received, self.payload_size) {
                        Ok(reply) => State::Replying { reply },
                        Err(e) => {
                            warn!(self.logger, "rejecting request"; "error" => %e);
                            return Err(e.into());
                        }
                    }
                }
                State::Replying { reply } => {
                    conn.write_all(&reply).await?;
                    conn.flush().await?;
                    State::Closed
                }
                State::Closed => return Ok(()),
            }
        }
    }
}
