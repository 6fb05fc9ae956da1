use crate::handler::RequestHandler;
use crate::transport::Connection;
use slog::{debug, info, o, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::sync::CancellationToken;

/// Accepts connections and runs each one through the request handler on its
/// own task.
pub struct Acceptor {
    listener: TcpListener,
    handler: Arc<RequestHandler>,
    logger: slog::Logger,
}

impl Acceptor {
    pub async fn bind<A: ToSocketAddrs>(addr: A, handler: RequestHandler, logger: slog::Logger) -> io::Result<Acceptor> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Acceptor {
            listener,
            handler: Arc::new(handler),
            logger,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until cancelled. Connection handlers still running when this
    /// returns are left to finish on their own.
    pub async fn run(self, cancel: CancellationToken) {
        info!(self.logger, "accepting connections";
            "addr" => self.local_addr().map(|a| a.to_string()).unwrap_or_default());
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    let logger = self.logger.new(o!("peer" => peer.to_string()));
                    let handler = self.handler.clone();
                    debug!(logger, "accepted connection");
                    tokio::spawn(async move {
                        if let Err(e) = handler.handle(Connection::Tcp(stream)).await {
                            debug!(logger, "connection ended without reply"; "error" => %e);
                        }
                    });
                }
                Err(e) => {
                    // typically out of file descriptors, give in-flight
                    // connections a moment to finish
                    warn!(self.logger, "accept failed"; "error" => %e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
        info!(self.logger, "stopped accepting connections");
    }
}
