//! TCP accept loop and CRLF line reading shared by both ports.
//!
//! One task per accepted connection. Each read is bounded by a rolling
//! timeout; a timeout, read error or oversized buffer ends that connection
//! only.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use cuas_core::config::ListenConfig;
use cuas_core::framing::LineBuffer;
use cuas_core::CuasError;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum ConnError {
    #[error("read timed out after {0:?}")]
    Timeout(Duration),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Framing(#[from] CuasError),
}

/// Per-connection limits.
#[derive(Debug, Clone, Copy)]
pub struct ConnOptions {
    pub read_timeout: Duration,
    pub max_line_buffer: usize,
}

impl From<&ListenConfig> for ConnOptions {
    fn from(c: &ListenConfig) -> Self {
        ConnOptions {
            read_timeout: Duration::from_secs(c.read_timeout_secs.max(1)),
            max_line_buffer: c.max_line_buffer,
        }
    }
}

impl Default for ConnOptions {
    fn default() -> Self {
        ConnOptions::from(&ListenConfig::default())
    }
}

/// Yields trimmed CRLF-terminated lines from a byte stream.
pub struct LineReader<R> {
    reader: R,
    buf: LineBuffer,
    read_timeout: Duration,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R, opts: ConnOptions) -> Self {
        LineReader {
            reader,
            buf: LineBuffer::new(opts.max_line_buffer),
            read_timeout: opts.read_timeout,
        }
    }

    /// Next complete line; `Ok(None)` when the peer closed the stream.
    pub async fn next_line(&mut self) -> Result<Option<String>, ConnError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(line) = self.buf.next_line() {
                return Ok(Some(line));
            }
            let n = tokio::time::timeout(self.read_timeout, self.reader.read(&mut chunk))
                .await
                .map_err(|_| ConnError::Timeout(self.read_timeout))??;
            if n == 0 {
                return Ok(None);
            }
            self.buf.push(&chunk[..n])?;
        }
    }
}

/// Something that owns an accepted connection until it ends.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn handle(&self, stream: TcpStream, peer: SocketAddr, opts: ConnOptions);
}

/// Bind `host:port`.
pub async fn bind(host: &str, port: u16) -> anyhow::Result<TcpListener> {
    use anyhow::Context;
    TcpListener::bind((host, port))
        .await
        .with_context(|| format!("binding {host}:{port}"))
}

/// Accept connections until `shutdown` flips to true.
///
/// In-flight connections are not cancelled; they end on their next read
/// timeout or when the peer disconnects.
pub async fn serve(
    listener: TcpListener,
    handler: Arc<dyn ConnectionHandler>,
    opts: ConnOptions,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = handler.name();
    if let Ok(addr) = listener.local_addr() {
        info!(listener = name, %addr, "listening");
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(listener = name, %peer, "connection opened");
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        handler.handle(stream, peer, opts).await;
                        debug!(listener = name, %peer, "connection task finished");
                    });
                }
                Err(e) => error!(listener = name, error = %e, "accept failed"),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(listener = name, "listener closed");
                    return;
                }
            }
        }
    }
}

/// Log why a connection ended.
pub fn log_conn_end(listener: &'static str, peer: SocketAddr, result: Result<(), ConnError>) {
    match result {
        Ok(()) => info!(listener, %peer, "peer closed connection"),
        Err(ConnError::Timeout(t)) => info!(listener, %peer, timeout = ?t, "connection idle, closing"),
        Err(e) => warn!(listener, %peer, error = %e, "connection dropped"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn opts(timeout_ms: u64, limit: usize) -> ConnOptions {
        ConnOptions {
            read_timeout: Duration::from_millis(timeout_ms),
            max_line_buffer: limit,
        }
    }

    #[tokio::test]
    async fn test_lines_across_chunks() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = LineReader::new(server, opts(1000, 1024));

        client.write_all(b"serial=A, mod").await.unwrap();
        client.write_all(b"el=X\r\n\r\nserial=B\r\n").await.unwrap();
        drop(client);

        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("serial=A, model=X"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("serial=B"));
        assert!(reader.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (_client, server) = tokio::io::duplex(64);
        let mut reader = LineReader::new(server, opts(20, 1024));
        assert!(matches!(reader.next_line().await, Err(ConnError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_oversized_line_drops_connection() {
        let (mut client, server) = tokio::io::duplex(4096);
        let mut reader = LineReader::new(server, opts(1000, 16));
        client.write_all(&[b'x'; 64]).await.unwrap();
        assert!(matches!(
            reader.next_line().await,
            Err(ConnError::Framing(CuasError::BufferOverflow { limit: 16 }))
        ));
    }
}
