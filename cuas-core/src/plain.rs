//! Plain telemetry dialect from decoder boxes (the fallback dialect).
//!
//! Example:
//! `device=3, serial=1581F4XE, model=DJI-Mavic2, drone_gps=116.40,39.91,
//!  home_gps=116.39,39.90, pilot_gps=116.38,39.90, height=80, altitude=130,
//!  eastv=1.5, nothv=2.0, upv=0.1, freq=2414.5, rssi=-70, distance=1.25km`
//!
//! `device` is the decoder sub-identifier, set by the box itself.

use crate::fields::{pairs, parse_float, parse_gps};
use crate::qr;
use crate::types::{flight_speed, CuasError, Dialect, Result, SightingRecord, MTYPE_SHL};

/// Decode a plain telemetry line. Fails when `serial` is absent or empty.
pub fn decode(line: &str, now: i64) -> Result<SightingRecord> {
    let mut record = SightingRecord::new(Dialect::Plain, now);
    record.m_type = MTYPE_SHL;

    for (key, value) in pairs(line) {
        apply_field(&mut record, &key, &value);
    }

    if record.serial.is_empty() {
        return Err(CuasError::MissingSerial);
    }

    record.classify();
    record.target_id = record.serial.clone();
    record.speed = flight_speed(record.east_v, record.north_v, record.up_v);
    record.png = qr::pilot_qr_or_empty(record.pilot_gps.longitude, record.pilot_gps.latitude);
    Ok(record)
}

fn apply_field(record: &mut SightingRecord, key: &str, value: &str) {
    match key {
        "device" => record.device = value.to_string(),
        "serial" => record.serial = value.to_string(),
        "model" => record.model = normalize_model(value),
        "drone_gps" => record.drone_gps = parse_gps(value),
        "home_gps" => record.home_gps = parse_gps(value),
        "pilot_gps" => record.pilot_gps = parse_gps(value),
        "height" => record.height = parse_float(value),
        "altitude" => record.altitude = parse_float(value),
        "eastv" => record.east_v = parse_float(value),
        // Wire spelling.
        "nothv" => record.north_v = parse_float(value),
        "upv" => record.up_v = parse_float(value),
        "freq" => record.freq = parse_float(value),
        "rssi" => record.rssi = parse_float(value),
        "distance" => record.distance = parse_distance(value) / 1000.0,
        _ => {}
    }
}

/// `DJI-Mavic2` -> `Mavic2`; values without `-` pass through.
fn normalize_model(value: &str) -> String {
    let mut parts = value.split('-');
    match (parts.next(), parts.next()) {
        (Some(_), Some(model)) => model.to_string(),
        _ => value.to_string(),
    }
}

fn parse_distance(value: &str) -> f64 {
    parse_float(value.strip_suffix("km").unwrap_or(value))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
