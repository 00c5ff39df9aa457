//! Broadcast remote-ID dialect.
//!
//! Example:
//! `RID SSID=RID-1581F5, freq=2437.0, rssi=-58, serial=RID-1581F5FBD1, model=Mavic 3,
//!  drone_gps=116.397,39.908, pilot_gps=116.390,39.901, height_agl=120, altitude=168`
//!
//! The `serial` value carries a 4-byte framing prefix that is stripped.
//! The decoder sub-identifier is not on the wire; the caller attributes it
//! from the sending IP.

use crate::fields::{pairs, parse_float, parse_gps};
use crate::qr;
use crate::types::{CuasError, Dialect, Result, SightingRecord};

/// Length of the framing prefix on `serial` values.
const SERIAL_PREFIX_LEN: usize = 4;

/// Decode a remote-ID line. Fails when no serial survives prefix stripping.
pub fn decode(line: &str, now: i64) -> Result<SightingRecord> {
    let mut record = SightingRecord::new(Dialect::RemoteId, now);

    for (key, value) in pairs(line) {
        apply_field(&mut record, &key, &value);
    }

    if record.serial.is_empty() {
        return Err(CuasError::MissingSerial);
    }

    record.classify();
    record.target_id = record.serial.clone();
    record.png = qr::pilot_qr_or_empty(record.pilot_gps.longitude, record.pilot_gps.latitude);
    Ok(record)
}

fn apply_field(record: &mut SightingRecord, key: &str, value: &str) {
    let key = if key == "rid ssid" { "ssid" } else { key };

    match key {
        "serial" => record.serial = strip_serial_prefix(value),
        "model" => record.model = value.to_string(),
        "drone_gps" => record.drone_gps = parse_gps(value),
        "pilot_gps" => record.pilot_gps = parse_gps(value),
        "height_agl" => record.height = parse_float(value),
        "altitude" => record.altitude = parse_float(value),
        "speed" => record.east_v = parse_float(value),
        "vspeed" => record.up_v = parse_float(value),
        "rssi" => record.rssi = parse_float(value),
        "freq" => record.freq = parse_float(value),
        "ua_type" => record.m_type = parse_float(value) as u32,
        "mac" => record.mac = value.to_string(),
        _ => {}
    }
}

/// Drop the prefix by bytes, not chars; a split multi-byte char becomes
/// U+FFFD rather than rejecting the serial.
fn strip_serial_prefix(value: &str) -> String {
    value
        .as_bytes()
        .get(SERIAL_PREFIX_LEN..)
        .map(|rest| String::from_utf8_lossy(rest).into_owned())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DroneType;

    const LINE: &str = "RID SSID=RID-1581F5, freq=2437.0, rssi=-58, serial=RID-1581F5FBD1, \
        model=Mavic 3, drone_gps=116.397,39.908, pilot_gps=116.390,39.901, \
        height_agl=120, altitude=168.5, speed=4.5, vspeed=-1.2, mac=60:60:1f:aa:bb:cc";

    #[test]
    fn test_decode_full_line() {
        let r = decode(LINE, 1000).unwrap();
        assert_eq!(r.serial, "1581F5FBD1");
        assert_eq!(r.target_id, "1581F5FBD1");
        assert_eq!(r.model, "Mavic 3");
        assert_eq!(r.freq, 2437.0);
        assert_eq!(r.rssi, -58.0);
        assert_eq!(r.drone_gps.longitude, 116.397);
        assert_eq!(r.drone_gps.latitude, 39.908);
        assert_eq!(r.pilot_gps.longitude, 116.390);
        assert_eq!(r.height, 120.0);
        assert_eq!(r.altitude, 168.5);
        assert_eq!(r.east_v, 4.5);
        assert_eq!(r.up_v, -1.2);
        assert_eq!(r.mac, "60:60:1f:aa:bb:cc");
        assert_eq!(r.dialect, Dialect::RemoteId);
        assert_eq!(r.sign, 2);
        assert_eq!(r.observed_at, 1000);
        assert_eq!(r.drone_type, DroneType::Both);
        assert!(r.png.starts_with("data:image/png;base64,"));
        assert!(r.device.is_empty());
    }

    #[test]
    fn test_short_serial_rejected() {
        let line = "RID SSID=x, freq=1.0, serial=RID-";
        assert!(matches!(decode(line, 0), Err(CuasError::MissingSerial)));
        let line = "RID SSID=x, freq=1.0, serial=AB";
        assert!(matches!(decode(line, 0), Err(CuasError::MissingSerial)));
    }

    #[test]
    fn test_prefix_stripped_by_bytes() {
        // "ü" is two bytes, so the prefix ends inside "é".
        let line = "RID SSID=x, freq=1.0, serial=Rüé1581F5";
        let r = decode(line, 0).unwrap();
        assert_eq!(r.serial, "\u{FFFD}1581F5");

        let line = "RID SSID=x, freq=1.0, serial=RÜD-ABCD";
        assert_eq!(decode(line, 0).unwrap().serial, "-ABCD");
    }

    #[test]
    fn test_pilot_only_no_drone_fix() {
        let line = "RID SSID=x, freq=1.0, serial=RID-ABCD, pilot_gps=116.1,39.1";
        let r = decode(line, 0).unwrap();
        assert_eq!(r.serial, "ABCD");
        assert_eq!(r.drone_type, DroneType::PilotOnly);
    }

    #[test]
    fn test_missing_pilot_leaves_png_empty() {
        let line = "RID SSID=x, freq=1.0, serial=RID-ABCD, drone_gps=116.1,39.1";
        let r = decode(line, 0).unwrap();
        assert!(r.png.is_empty());
        assert_eq!(r.drone_type, DroneType::AircraftOnly);
    }

    #[test]
    fn test_ua_type_sets_manufacturer() {
        let line = "RID SSID=x, freq=1.0, serial=RID-ABCD, ua_type=2";
        assert_eq!(decode(line, 0).unwrap().m_type, 2);
    }
}
