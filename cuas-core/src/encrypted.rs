//! Encrypted-payload dialect.
//!
//! The line is a wrapper around an opaque byte payload:
//!
//! `Encypted Mavic_O4_ID=1A2B3C4D, freq=5745.5, rssi=-71.5, byte,58,a,ff,3,...`
//!
//! The bytes after `byte,` are re-assembled into a lowercase hex string and
//! sent, with the current credential, to an external decrypt service (see
//! `cuas-server`). This module owns everything that does not touch the
//! network: frame extraction, turning a decrypt result into a sighting, and
//! the consecutive-failure breaker that gates degraded emissions.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::types::{
    flight_speed, CuasError, Dialect, Gps, Result, SightingRecord, MTYPE_SHL,
};

/// Consecutive decrypt failures before one degraded record is emitted.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 20;

/// Model tag carried by degraded records.
pub const DEGRADED_MODEL: &str = "DJI-Drone";

static FREQ_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"freq=([0-9]+\.[0-9]+)").expect("static regex"));
static RSSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"rssi=(-?[0-9]+(?:\.[0-9]+)?)").expect("static regex"));
static FALLBACK_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Encypted Mavic_O4_ID=([0-9a-fA-F]+)").expect("static regex")
});

const PAYLOAD_MARKER: &str = "byte,";

// ---------------------------------------------------------------------------
// Frame extraction
// ---------------------------------------------------------------------------

/// Everything extracted from an encrypted line before decryption.
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptedFrame {
    pub freq: f64,
    pub rssi: f64,
    /// Lowercase hex, two digits per byte token.
    pub payload_hex: String,
    /// Plaintext identifier used only for degraded records (may be empty).
    pub fallback_id: String,
}

/// Extract frequency, RSSI, fallback identifier and hex payload.
pub fn extract_frame(line: &str) -> Result<EncryptedFrame> {
    let freq = FREQ_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .ok_or_else(|| CuasError::Protocol("freq not found".into()))?
        .as_str()
        .parse::<f64>()
        .map_err(|e| CuasError::Protocol(format!("invalid freq: {e}")))?;

    let rssi = RSSI_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .ok_or_else(|| CuasError::Protocol("rssi not found".into()))?
        .as_str()
        .parse::<f64>()
        .map_err(|e| CuasError::Protocol(format!("invalid rssi: {e}")))?;

    let fallback_id = FALLBACK_ID_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
        .unwrap_or_default();

    let idx = line
        .find(PAYLOAD_MARKER)
        .ok_or_else(|| CuasError::Protocol("'byte,' not found".into()))?;
    let payload_hex = assemble_hex(&line[idx + PAYLOAD_MARKER.len()..]);

    Ok(EncryptedFrame {
        freq,
        rssi,
        payload_hex,
        fallback_id,
    })
}

/// `58,a,FF, 3` -> `580aff03`. Whitespace is ignored, empty tokens skipped.
fn assemble_hex(tokens: &str) -> String {
    let compact: String = tokens.chars().filter(|c| !c.is_whitespace()).collect();
    let mut hex = String::with_capacity(compact.len());
    for token in compact.split(',').filter(|t| !t.is_empty()) {
        if token.len() == 1 {
            hex.push('0');
        }
        hex.push_str(&token.to_lowercase());
    }
    hex
}

// ---------------------------------------------------------------------------
// Decrypt results
// ---------------------------------------------------------------------------

/// Body returned by the decrypt service.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DecryptedFields {
    pub sn: String,
    pub model: String,
    pub lon: f64,
    pub lat: f64,
    pub alt: f64,
    pub height: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub pilot_lon: f64,
    pub pilot_lat: f64,
    pub home_lon: f64,
    pub home_lat: f64,
}

/// Build the sighting for a successful decrypt.
pub fn decrypted_sighting(
    frame: &EncryptedFrame,
    fields: &DecryptedFields,
    now: i64,
) -> SightingRecord {
    let mut record = SightingRecord::new(Dialect::Encrypted, now);
    record.serial = fields.sn.clone();
    record.target_id = fields.sn.clone();
    record.model = fields.model.clone();
    record.drone_gps = Gps::new(fields.lon, fields.lat);
    record.home_gps = Gps::new(fields.home_lon, fields.home_lat);
    record.pilot_gps = Gps::new(fields.pilot_lon, fields.pilot_lat);
    record.altitude = fields.alt;
    record.height = fields.height;
    record.east_v = fields.x;
    record.north_v = fields.y;
    record.up_v = fields.z;
    record.freq = frame.freq;
    record.rssi = frame.rssi;
    record.m_type = MTYPE_SHL;
    record.speed = flight_speed(fields.x, fields.y, fields.z);
    record.classify();
    record
}

/// Build the low-confidence record emitted once the breaker trips.
pub fn degraded_sighting(frame: &EncryptedFrame, now: i64) -> SightingRecord {
    let mut record = SightingRecord::new(Dialect::Encrypted, now);
    record.serial = frame.fallback_id.clone();
    record.target_id = frame.fallback_id.clone();
    record.model = DEGRADED_MODEL.to_string();
    record.freq = frame.freq;
    record.rssi = frame.rssi;
    record.m_type = MTYPE_SHL;
    record
}

// ---------------------------------------------------------------------------
// Failure breaker
// ---------------------------------------------------------------------------

/// Counts consecutive decrypt failures.
///
/// A success resets the count. A failure that brings the count to the
/// threshold also resets it and reports `Trip`, so at most one degraded
/// record is produced per `threshold` consecutive failures.
#[derive(Debug)]
pub struct DecryptBreaker {
    failures: AtomicU32,
    threshold: u32,
}

/// Result of recording one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Still below threshold; carries the running count.
    Counting(u32),
    /// Threshold reached; the counter has been reset.
    Trip,
}

impl DecryptBreaker {
    pub fn new(threshold: u32) -> Self {
        DecryptBreaker {
            failures: AtomicU32::new(0),
            threshold: threshold.max(1),
        }
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    pub fn record_failure(&self) -> BreakerState {
        let count = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.threshold {
            self.failures.store(0, Ordering::SeqCst);
            BreakerState::Trip
        } else {
            BreakerState::Counting(count)
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

impl Default for DecryptBreaker {
    fn default() -> Self {
        DecryptBreaker::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DroneType;

    const LINE: &str =
        "Encypted Mavic_O4_ID=1A2B3C4D, freq=5745.5, rssi=-71.5, byte,58,a,FF, 3,,";

    #[test]
    fn test_extract_frame() {
        let f = extract_frame(LINE).unwrap();
        assert_eq!(f.freq, 5745.5);
        assert_eq!(f.rssi, -71.5);
        assert_eq!(f.fallback_id, "1a2b3c4d");
        assert_eq!(f.payload_hex, "580aff03");
    }

    #[test]
    fn test_extract_requires_decimal_freq() {
        let err = extract_frame("freq=5745, rssi=-1, byte,01").unwrap_err();
        assert!(matches!(err, CuasError::Protocol(_)));
    }

    #[test]
    fn test_extract_requires_rssi_and_marker() {
        assert!(extract_frame("freq=1.5, byte,01").is_err());
        assert!(extract_frame("freq=1.5, rssi=-3, bytes 01").is_err());
    }

    #[test]
    fn test_fallback_id_optional() {
        let f = extract_frame("freq=1.5, rssi=-3, byte,1").unwrap();
        assert_eq!(f.fallback_id, "");
        assert_eq!(f.payload_hex, "01");
    }

    #[test]
    fn test_decrypted_sighting() {
        let frame = extract_frame(LINE).unwrap();
        let fields = DecryptedFields {
            sn: "1581F6ABC".into(),
            model: "Mavic 3".into(),
            lon: 116.4,
            lat: 39.9,
            x: 3.0,
            y: 4.0,
            z: 12.0,
            pilot_lon: 116.39,
            pilot_lat: 39.89,
            ..Default::default()
        };
        let r = decrypted_sighting(&frame, &fields, 7);
        assert_eq!(r.serial, "1581F6ABC");
        assert_eq!(r.target_id, "1581F6ABC");
        assert_eq!(r.freq, 5745.5);
        assert_eq!(r.speed, 13.0);
        assert_eq!(r.drone_type, DroneType::Both);
        assert_eq!(r.dialect, Dialect::Encrypted);
        assert_eq!(r.sign, 1);
    }

    #[test]
    fn test_decrypted_fields_partial_json() {
        let fields: DecryptedFields =
            serde_json::from_str(r#"{"sn":"X","lon":1.5,"unexpected":true}"#).unwrap();
        assert_eq!(fields.sn, "X");
        assert_eq!(fields.lon, 1.5);
        assert_eq!(fields.lat, 0.0);
    }

    #[test]
    fn test_degraded_sighting() {
        let frame = extract_frame(LINE).unwrap();
        let r = degraded_sighting(&frame, 9);
        assert_eq!(r.serial, "1a2b3c4d");
        assert_eq!(r.model, DEGRADED_MODEL);
        assert_eq!(r.rssi, -71.5);
    }

    #[test]
    fn test_breaker_trips_once_per_threshold() {
        let breaker = DecryptBreaker::new(20);
        let mut trips = 0;
        for i in 1..=19 {
            assert_eq!(breaker.record_failure(), BreakerState::Counting(i));
        }
        if breaker.record_failure() == BreakerState::Trip {
            trips += 1;
        }
        assert_eq!(trips, 1);
        assert_eq!(breaker.failures(), 0);

        // 21st consecutive failure starts a fresh count.
        assert_eq!(breaker.record_failure(), BreakerState::Counting(1));
        for _ in 0..18 {
            breaker.record_failure();
        }
        assert_eq!(breaker.record_failure(), BreakerState::Trip);
    }

    #[test]
    fn test_breaker_success_resets() {
        let breaker = DecryptBreaker::default();
        for _ in 0..19 {
            breaker.record_failure();
        }
        breaker.record_success();
        assert_eq!(breaker.failures(), 0);
        assert_eq!(breaker.record_failure(), BreakerState::Counting(1));
    }
}
