//! Telemetry port: decode, attribute, decrypt and correlate sightings.
//!
//! Lock order is flat: registry lookups finish before the track table's
//! write lock is taken, and the breaker is a lock-free counter.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use cuas_core::config::MapDatum;
use cuas_core::decode::{decode_line, Decoded};
use cuas_core::encrypted::{
    decrypted_sighting, degraded_sighting, BreakerState, DecryptBreaker, EncryptedFrame,
};
use cuas_core::registry::DeviceRegistry;
use cuas_core::tracker::{TrackOutcome, TrackTable};
use cuas_core::types::{unix_now, Dialect, LiveTrack, SightingRecord};

use crate::client::{ClientError, Decryptor};
use crate::listener::{log_conn_end, ConnError, ConnOptions, ConnectionHandler, LineReader};

/// Shared state behind the telemetry listener.
pub struct TelemetryService {
    registry: Arc<DeviceRegistry>,
    decryptor: Arc<dyn Decryptor>,
    breaker: DecryptBreaker,
    tracks: RwLock<TrackTable>,
    datum: MapDatum,
}

impl TelemetryService {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        decryptor: Arc<dyn Decryptor>,
        failure_threshold: u32,
        datum: MapDatum,
    ) -> Self {
        TelemetryService {
            registry,
            decryptor,
            breaker: DecryptBreaker::new(failure_threshold),
            tracks: RwLock::new(TrackTable::new()),
            datum,
        }
    }

    fn read_tracks(&self) -> RwLockReadGuard<'_, TrackTable> {
        self.tracks.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_tracks(&self) -> RwLockWriteGuard<'_, TrackTable> {
        self.tracks.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of every live track, in the configured map datum.
    pub fn live_tracks(&self) -> Vec<LiveTrack> {
        self.read_tracks().snapshot(self.datum)
    }

    pub fn track_count(&self) -> usize {
        self.read_tracks().len()
    }

    /// Current consecutive decrypt failures.
    pub fn decrypt_failures(&self) -> u32 {
        self.breaker.failures()
    }

    /// Process one line from `peer_ip`. `None` when the line was dropped
    /// before reaching the track table.
    pub async fn handle_line(&self, line: &str, peer_ip: &str) -> Option<TrackOutcome> {
        let now = unix_now();

        let mut sighting = match decode_line(line, now) {
            Ok(Decoded::Sighting(s)) => s,
            Ok(Decoded::Encrypted(frame)) => self.decrypt(&frame, now).await?,
            Err(e) => {
                warn!(peer = peer_ip, error = %e, line, "dropping telemetry line");
                return None;
            }
        };

        if !self.attribute(&mut sighting, peer_ip) {
            return None;
        }

        let site = self.registry.resolve_sensor(&sighting.device);
        let serial = sighting.serial.clone();
        let device = sighting.device.clone();
        let outcome = self.write_tracks().update(sighting, site.as_ref(), now);

        match outcome {
            TrackOutcome::Inserted => info!(%serial, %device, "new track"),
            TrackOutcome::Merged => debug!(%serial, %device, "track updated"),
            TrackOutcome::Ignored(reason) => debug!(%serial, %device, reason, "sighting ignored"),
        }
        Some(outcome)
    }

    /// Fill `device` for dialects that do not carry it on the wire.
    fn attribute(&self, sighting: &mut SightingRecord, peer_ip: &str) -> bool {
        let parse_id = match sighting.dialect {
            Dialect::Plain => return true,
            _ => self.registry.parse_id_by_parse_ip(peer_ip),
        };

        match (sighting.dialect, parse_id) {
            (_, Some(id)) => {
                sighting.device = id.to_string();
                true
            }
            (Dialect::RemoteId, None) => {
                warn!(peer = peer_ip, serial = %sighting.serial, "no decoder registered for peer, dropping remote-ID line");
                false
            }
            (_, None) => true,
        }
    }

    /// Decrypt a frame, applying the failure breaker.
    async fn decrypt(&self, frame: &EncryptedFrame, now: i64) -> Option<SightingRecord> {
        let result = match self.registry.token() {
            Some(token) => self
                .decryptor
                .decrypt(&frame.payload_hex, &token)
                .await
                .and_then(|fields| {
                    if fields.sn.is_empty() {
                        Err(ClientError::EmptySerial)
                    } else {
                        Ok(fields)
                    }
                }),
            None => Err(ClientError::NoCredential),
        };

        match result {
            Ok(fields) => {
                self.breaker.record_success();
                Some(decrypted_sighting(frame, &fields, now))
            }
            Err(e) => match self.breaker.record_failure() {
                BreakerState::Counting(failures) => {
                    warn!(error = %e, failures, "decrypt failed");
                    None
                }
                BreakerState::Trip => {
                    warn!(
                        error = %e,
                        threshold = self.breaker.threshold(),
                        fallback_id = %frame.fallback_id,
                        "decrypt failure threshold reached, emitting degraded record"
                    );
                    Some(degraded_sighting(frame, now))
                }
            },
        }
    }

    async fn read_loop(&self, stream: TcpStream, peer: SocketAddr, opts: ConnOptions) -> Result<(), ConnError> {
        let peer_ip = peer.ip().to_string();
        let mut reader = LineReader::new(stream, opts);
        while let Some(line) = reader.next_line().await? {
            self.handle_line(&line, &peer_ip).await;
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionHandler for TelemetryService {
    fn name(&self) -> &'static str {
        "telemetry"
    }

    async fn handle(&self, stream: TcpStream, peer: SocketAddr, opts: ConnOptions) {
        let result = self.read_loop(stream, peer, opts).await;
        log_conn_end(self.name(), peer, result);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
