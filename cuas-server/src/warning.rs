//! Warning port: greet each sensor with `AT\r\n`, then collect RF warnings.

use std::net::SocketAddr;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use cuas_core::types::{unix_now, WarningEvent};
use cuas_core::warning::{self, WarningWindow};

use crate::listener::{log_conn_end, ConnError, ConnOptions, ConnectionHandler, LineReader};

/// Shared sliding window of recent warnings.
#[derive(Default)]
pub struct WarningService {
    window: RwLock<WarningWindow>,
}

impl WarningService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one line from `peer`. True when a warning was stored.
    pub fn handle_line(&self, line: &str, peer: &str, now: i64) -> bool {
        if warning::is_ack(line) {
            debug!(peer, line, "sensor acknowledgement");
            return false;
        }
        if !warning::is_warning(line) {
            debug!(peer, line, "ignoring unrecognised warning-port line");
            return false;
        }
        match warning::parse_warning(line, peer, now) {
            Some(event) => {
                info!(peer, freq = %event.freq, rssi = %event.rssi, "RF warning");
                self.window
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(event);
                true
            }
            None => false,
        }
    }

    /// Snapshot of warnings near the latest one.
    pub fn warning_events(&self) -> Vec<WarningEvent> {
        self.window
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot()
    }

    async fn read_loop(&self, mut stream: TcpStream, peer: SocketAddr, opts: ConnOptions) -> Result<(), ConnError> {
        stream.write_all(warning::GREETING).await?;
        let peer_addr = peer.to_string();
        let mut reader = LineReader::new(stream, opts);
        while let Some(line) = reader.next_line().await? {
            self.handle_line(&line, &peer_addr, unix_now());
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionHandler for WarningService {
    fn name(&self) -> &'static str {
        "warning"
    }

    async fn handle(&self, stream: TcpStream, peer: SocketAddr, opts: ConnOptions) {
        let result = self.read_loop(stream, peer, opts).await;
        log_conn_end(self.name(), peer, result);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::AsyncReadExt;
    use tokio::sync::watch;

    use crate::listener;

    #[test]
    fn test_handle_line() {
        let svc = WarningService::new();
        assert!(!svc.handle_line("AT+OK", "10.0.0.9:4000", 0));
        assert!(!svc.handle_line("hello", "10.0.0.9:4000", 0));
        assert!(svc.handle_line("Waring,Freq 5025,RSSI 0.60", "10.0.0.9:4000", 0));
        assert!(svc.handle_line("Waring,Freq 5800,RSSI 0.72", "10.0.0.9:4000", 1));
        assert!(svc.handle_line("Waring,Freq 2400,RSSI 0.10", "10.0.0.9:4000", 5));

        let events = svc.warning_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].freq, "2400");
        assert_eq!(events[0].ip, "10.0.0.9:4000");
    }

    #[tokio::test]
    async fn test_greeting_and_warning_over_tcp() {
        let svc = Arc::new(WarningService::new());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let server = tokio::spawn(listener::serve(listener, svc.clone(), ConnOptions::default(), rx));

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut greeting = [0u8; 4];
        client.read_exact(&mut greeting).await.unwrap();
        assert_eq!(&greeting, b"AT\r\n");

        client
            .write_all(b"AT+OK\r\nWaring,Freq 5025,RSSI 0.60\r\n")
            .await
            .unwrap();

        for _ in 0..100 {
            if !svc.warning_events().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let events = svc.warning_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].rssi, "0.60");
        assert_eq!(events[0].ip, client.local_addr().unwrap().to_string());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap();
    }
}
