//! Shared types, error enum, and the canonical sighting / track records.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors produced by cuas-core.
#[derive(Debug, Error)]
pub enum CuasError {
    #[error("malformed line: {0}")]
    Protocol(String),
    #[error("record carries no serial")]
    MissingSerial,
    #[error("no decoder registered for {0}")]
    UnknownDecoder(String),
    #[error("line buffer exceeded {limit} bytes")]
    BufferOverflow { limit: usize },
    #[error("QR code generation failed: {0}")]
    QrCode(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CuasError>;

/// Current unix time in whole seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// WGS-84 position. A zero longitude means "no fix".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Gps {
    pub latitude: f64,
    pub longitude: f64,
}

impl Gps {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Gps {
            latitude,
            longitude,
        }
    }

    pub fn has_fix(&self) -> bool {
        self.longitude != 0.0
    }
}

/// Single point of a drone trail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub lat: f64,
    pub lng: f64,
}

// ---------------------------------------------------------------------------
// Classification tags
// ---------------------------------------------------------------------------

/// Which parties of a flight were seen, derived from the populated GPS fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum DroneType {
    #[default]
    Unknown,
    /// Only the pilot / remote controller has a fix.
    PilotOnly,
    /// Only the aircraft has a fix.
    AircraftOnly,
    Both,
}

impl DroneType {
    /// Classify from aircraft and pilot fixes. `None` when neither is set, so
    /// callers can keep a previous classification.
    pub fn classify(drone: &Gps, pilot: &Gps) -> Option<DroneType> {
        match (drone.has_fix(), pilot.has_fix()) {
            (false, true) => Some(DroneType::PilotOnly),
            (true, false) => Some(DroneType::AircraftOnly),
            (true, true) => Some(DroneType::Both),
            (false, false) => None,
        }
    }
}

impl From<DroneType> for u8 {
    fn from(t: DroneType) -> u8 {
        match t {
            DroneType::Unknown => 0,
            DroneType::PilotOnly => 1,
            DroneType::AircraftOnly => 2,
            DroneType::Both => 3,
        }
    }
}

impl TryFrom<u8> for DroneType {
    type Error = String;

    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        match v {
            0 => Ok(DroneType::Unknown),
            1 => Ok(DroneType::PilotOnly),
            2 => Ok(DroneType::AircraftOnly),
            3 => Ok(DroneType::Both),
            other => Err(format!("unknown drone type {other}")),
        }
    }
}

/// Wire dialect a sighting was decoded from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    RemoteId,
    Encrypted,
    #[default]
    Plain,
}

impl Dialect {
    /// Frame layout family reported to the presentation layer
    /// (1 = legacy O2/O3 layout, 2 = O3+/O4 and remote-ID).
    pub fn sign(&self) -> u8 {
        match self {
            Dialect::RemoteId => 2,
            Dialect::Encrypted | Dialect::Plain => 1,
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::RemoteId => write!(f, "remote-id"),
            Dialect::Encrypted => write!(f, "encrypted"),
            Dialect::Plain => write!(f, "plain"),
        }
    }
}

/// Decoder hardware family that produced the line.
pub const MTYPE_ZK: u32 = 1;
pub const MTYPE_SHL: u32 = 2;

// ---------------------------------------------------------------------------
// Sighting record
// ---------------------------------------------------------------------------

/// One decoded telemetry packet, the common output of every decoder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SightingRecord {
    /// Decoder sub-identifier (as text, straight from the wire or the registry).
    pub device: String,
    pub model: String,
    pub freq: f64,
    pub rssi: f64,
    pub height: f64,
    pub altitude: f64,
    #[serde(rename = "eastv")]
    pub east_v: f64,
    #[serde(rename = "northv")]
    pub north_v: f64,
    #[serde(rename = "upv")]
    pub up_v: f64,
    pub distance: f64,
    pub serial: String,
    pub drone_gps: Gps,
    #[serde(rename = "return_positioning")]
    pub home_gps: Gps,
    #[serde(rename = "rc_gps")]
    pub pilot_gps: Gps,
    #[serde(rename = "trajectory_list")]
    pub trajectory: Vec<TrajectoryPoint>,
    pub m_type: u32,
    pub target_id: String,
    pub drone_type: DroneType,
    pub in_white_list: bool,
    /// `data:image/png;base64,...` QR code linking to the pilot position.
    pub png: String,
    pub dialect: Dialect,
    pub sign: u8,
    pub mac: String,
    pub speed: f64,
    /// Unix seconds when the record was decoded.
    pub observed_at: i64,
}

impl SightingRecord {
    pub fn new(dialect: Dialect, observed_at: i64) -> Self {
        SightingRecord {
            dialect,
            sign: dialect.sign(),
            observed_at,
            ..Default::default()
        }
    }

    /// Recompute `drone_type` from the GPS fields (unchanged if neither is set).
    pub fn classify(&mut self) {
        if let Some(t) = DroneType::classify(&self.drone_gps, &self.pilot_gps) {
            self.drone_type = t;
        }
    }
}

/// Scalar flight speed from east/north/up velocity components.
pub fn flight_speed(east_v: f64, north_v: f64, up_v: f64) -> f64 {
    let horizontal = (east_v * east_v + north_v * north_v).sqrt();
    (horizontal * horizontal + up_v * up_v).sqrt()
}

// ---------------------------------------------------------------------------
// Sensor geometry / live track
// ---------------------------------------------------------------------------

/// Azimuth sentinel: device located but no usable aircraft bearing.
pub const AZIMUTH_NO_FIX: f64 = 499.0;
/// Azimuth sentinel: owning device has no location.
pub const AZIMUTH_NO_DEVICE_LOCATION: f64 = 500.0;

/// Distance and bearing from the owning ground sensor to the aircraft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorGeometry {
    pub azimuth: f64,
    pub distance: f64,
    pub sensor_id: String,
    pub orientation: f64,
    pub device_lat: f64,
    pub device_lon: f64,
    pub height: f64,
}

/// Merged, continuously updated state for one (serial, device) key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveTrack {
    #[serde(flatten)]
    pub sighting: SightingRecord,
    #[serde(rename = "ld_result")]
    pub geometry: SensorGeometry,
    /// Unix seconds of the last merge (or insert).
    pub expires: i64,
}

// ---------------------------------------------------------------------------
// Warning event
// ---------------------------------------------------------------------------

/// One RF spectrum warning from a warning-port sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningEvent {
    pub freq: String,
    pub rssi: String,
    pub ip: String,
    pub time: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_pilot_only() {
        let t = DroneType::classify(&Gps::default(), &Gps::new(116.3, 39.9));
        assert_eq!(t, Some(DroneType::PilotOnly));
    }

    #[test]
    fn test_classify_both_and_unknown() {
        let fix = Gps::new(116.3, 39.9);
        assert_eq!(DroneType::classify(&fix, &fix), Some(DroneType::Both));
        assert_eq!(
            DroneType::classify(&fix, &Gps::default()),
            Some(DroneType::AircraftOnly)
        );
        assert_eq!(DroneType::classify(&Gps::default(), &Gps::default()), None);

        let mut record = SightingRecord::default();
        record.classify();
        assert_eq!(record.drone_type, DroneType::Unknown);
    }

    #[test]
    fn test_flight_speed() {
        assert_eq!(flight_speed(3.0, 4.0, 0.0), 5.0);
        assert!((flight_speed(3.0, 4.0, 12.0) - 13.0).abs() < 1e-9);
    }

    #[test]
    fn test_sighting_serializes_wire_names() {
        let mut record = SightingRecord::new(Dialect::RemoteId, 10);
        record.pilot_gps = Gps::new(116.0, 39.0);
        record.classify();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["rc_gps"]["longitude"], 116.0);
        assert_eq!(json["drone_type"], 1);
        assert_eq!(json["sign"], 2);
        assert_eq!(json["dialect"], "remote_id");
    }
}
