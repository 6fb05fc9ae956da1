use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::net::TcpStream;

/// A byte stream carrying one request/response exchange.
#[derive(Debug)]
pub enum Connection {
    Tcp(TcpStream),
    /// In-process pipe, used to drive the protocol without sockets.
    Pipe(DuplexStream),
}

impl Connection {
    /// Connected pair of in-memory connections.
    pub fn pipe(max_buf_size: usize) -> (Connection, Connection) {
        let (a, b) = tokio::io::duplex(max_buf_size);
        (Connection::Pipe(a), Connection::Pipe(b))
    }

    /// Shut down the write half. The peer sees end-of-stream.
    pub async fn close(&mut self) -> io::Result<()> {
        match self {
            Connection::Tcp(s) => s.shutdown().await,
            Connection::Pipe(s) => s.shutdown().await,
        }
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Connection::Pipe(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Connection::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Connection::Pipe(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp(s) => Pin::new(s).poll_flush(cx),
            Connection::Pipe(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Connection::Pipe(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
