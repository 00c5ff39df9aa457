//! Classify telemetry lines by dialect and route them to the right decoder.
//!
//! Priority order:
//! - remote-ID: contains (case-insensitively) `rid `, `ssid`, `freq`, `serial`
//! - encrypted: contains `byte`
//! - plain telemetry: anything else

use crate::encrypted::{self, EncryptedFrame};
use crate::types::{Dialect, Result, SightingRecord};
use crate::{plain, remote_id};

const REMOTE_ID_MARKERS: [&str; 4] = ["rid ", "ssid", "freq", "serial"];
const ENCRYPTED_MARKER: &str = "byte";

/// Decide which dialect a line is written in.
pub fn classify(line: &str) -> Dialect {
    let lower = line.to_lowercase();
    if REMOTE_ID_MARKERS.iter().all(|m| lower.contains(m)) {
        Dialect::RemoteId
    } else if line.contains(ENCRYPTED_MARKER) {
        Dialect::Encrypted
    } else {
        Dialect::Plain
    }
}

/// Output of the synchronous decode stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Fully decoded sighting.
    Sighting(SightingRecord),
    /// Encrypted payload that still needs the decrypt service.
    Encrypted(EncryptedFrame),
}

/// Decode one line. Encrypted lines stop at frame extraction.
pub fn decode_line(line: &str, now: i64) -> Result<Decoded> {
    match classify(line) {
        Dialect::RemoteId => remote_id::decode(line, now).map(Decoded::Sighting),
        Dialect::Encrypted => encrypted::extract_frame(line).map(Decoded::Encrypted),
        Dialect::Plain => plain::decode(line, now).map(Decoded::Sighting),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
