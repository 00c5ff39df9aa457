//! `key=value` field extraction shared by the text dialects.
//!
//! Lines look like `serial=ABC, drone_gps=116.39,39.90, rssi=-61`. Values
//! may themselves contain commas; a comma-separated fragment with no `=`
//! is glued back onto the preceding field.

use tracing::warn;

use crate::types::Gps;

/// Split a line into `key=value` fields, re-joining comma-bearing values.
///
/// Leading fragments without `=` are discarded.
pub fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();

    for part in line.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if part.contains('=') {
            if !current.is_empty() {
                fields.push(std::mem::take(&mut current));
            }
            current.push_str(part);
        } else if !current.is_empty() {
            current.push(',');
            current.push_str(part);
        }
    }
    if !current.is_empty() {
        fields.push(current);
    }
    fields
}

/// Split one field at the first `=`. Key is lower-cased, both sides trimmed.
pub fn parse_kv(field: &str) -> Option<(String, &str)> {
    let (key, value) = field.trim().split_once('=')?;
    Some((key.trim().to_lowercase(), value.trim()))
}

/// Iterate `(key, value)` pairs of a line.
pub fn pairs(line: &str) -> Vec<(String, String)> {
    split_fields(line)
        .iter()
        .filter_map(|f| parse_kv(f).map(|(k, v)| (k, v.to_string())))
        .collect()
}

/// Parse a float leniently: empty is 0.0, garbage is 0.0 with a warning.
pub fn parse_float(value: &str) -> f64 {
    let value = value.trim();
    if value.is_empty() {
        return 0.0;
    }
    match value.parse::<f64>() {
        Ok(v) => v,
        Err(e) => {
            warn!(value, error = %e, "unparseable numeric field, using 0");
            0.0
        }
    }
}

/// Parse a `lon,lat` pair. Anything else yields (0, 0).
pub fn parse_gps(value: &str) -> Gps {
    let value = value.trim();
    if value.is_empty() {
        return Gps::default();
    }
    let coords: Vec<&str> = value.split(',').collect();
    if coords.len() != 2 {
        warn!(value, "unparseable GPS pair");
        return Gps::default();
    }
    Gps::new(parse_float(coords[0]), parse_float(coords[1]))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
