//! Geospatial helpers: datum correction, great-circle distance, bearing.
//!
//! All inputs and outputs are decimal degrees. Nothing here holds state.

use std::f64::consts::PI;

/// Krasovsky 1940 semi-major axis (m).
const KRASOVSKY_A: f64 = 6378245.0;
/// Krasovsky 1940 first eccentricity squared.
const KRASOVSKY_EE: f64 = 0.006_693_421_622_965_943;

const EARTH_RADIUS_M: f64 = 6371000.0;

/// Convert a WGS-84 point to the GCJ-02 datum used by mainland map tiles.
///
/// Points outside the mainland bounding box are returned unchanged.
/// Converted results are truncated (not rounded) to 6 decimal places.
pub fn wgs84_to_gcj02(lon: f64, lat: f64) -> (f64, f64) {
    if outside_correction_area(lon, lat) {
        return (lon, lat);
    }

    let mut d_lat = transform_lat(lon - 105.0, lat - 35.0);
    let mut d_lon = transform_lon(lon - 105.0, lat - 35.0);
    let rad_lat = lat / 180.0 * PI;
    let magic = 1.0 - KRASOVSKY_EE * rad_lat.sin() * rad_lat.sin();
    let sqrt_magic = magic.sqrt();
    d_lat = (d_lat * 180.0) / ((KRASOVSKY_A * (1.0 - KRASOVSKY_EE)) / (magic * sqrt_magic) * PI);
    d_lon = (d_lon * 180.0) / (KRASOVSKY_A / sqrt_magic * rad_lat.cos() * PI);

    (truncate(lon + d_lon, 6), truncate(lat + d_lat, 6))
}

fn outside_correction_area(lon: f64, lat: f64) -> bool {
    !(lon > 73.66 && lon < 135.05 && lat > 3.86 && lat < 53.55)
}

fn transform_lat(x: f64, y: f64) -> f64 {
    let mut ret =
        -100.0 + 2.0 * x + 3.0 * y + 0.2 * y * y + 0.1 * x * y + 0.2 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (y * PI).sin() + 40.0 * (y / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (160.0 * (y / 12.0 * PI).sin() + 320.0 * (y * PI / 30.0).sin()) * 2.0 / 3.0;
    ret
}

fn transform_lon(x: f64, y: f64) -> f64 {
    let mut ret = 300.0 + x + 2.0 * y + 0.1 * x * x + 0.1 * x * y + 0.1 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (x * PI).sin() + 40.0 * (x / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (150.0 * (x / 12.0 * PI).sin() + 300.0 * (x / 30.0 * PI).sin()) * 2.0 / 3.0;
    ret
}

fn truncate(val: f64, places: i32) -> f64 {
    let pow = 10f64.powi(places);
    (val * pow).floor() / pow
}

/// Great-circle distance in whole meters (haversine).
///
/// Returns 0 when either target coordinate is exactly zero (no fix).
pub fn distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    if lat2 == 0.0 || lon2 == 0.0 {
        return 0.0;
    }
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    (EARTH_RADIUS_M * c).round()
}

/// Initial bearing from point 1 to point 2, degrees in `[0, 360)`.
pub fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcj02_outside_box_is_identity() {
        assert_eq!(wgs84_to_gcj02(200.0, 60.0), (200.0, 60.0));
        assert_eq!(wgs84_to_gcj02(-82.5, 35.5), (-82.5, 35.5));
    }

    #[test]
    fn test_gcj02_offset_inside_box() {
        // Beijing: GCJ-02 shifts roughly +0.006 lon, +0.001 lat
        let (lon, lat) = wgs84_to_gcj02(116.397_128, 39.916_527);
        assert!((lon - 116.397_128 - 0.0062).abs() < 0.001, "lon {lon}");
        assert!((lat - 39.916_527 - 0.0014).abs() < 0.001, "lat {lat}");
    }

    #[test]
    fn test_gcj02_truncates_to_six_places() {
        let (lon, lat) = wgs84_to_gcj02(121.473_701, 31.230_416);
        for v in [lon, lat] {
            let scaled = v * 1e6;
            assert!((scaled - scaled.round()).abs() < 1e-6, "{v} has more than 6 places");
        }
    }

    #[test]
    fn test_truncate_not_round() {
        assert_eq!(truncate(1.234_567_9, 6), 1.234_567);
    }

    #[test]
    fn test_distance_zero_target() {
        assert_eq!(distance_m(39.9, 116.3, 0.0, 116.4), 0.0);
        assert_eq!(distance_m(39.9, 116.3, 39.9, 0.0), 0.0);
    }

    #[test]
    fn test_distance_one_degree_latitude() {
        // 1 degree of latitude ~ 111,195 m on a 6371 km sphere
        let d = distance_m(30.0, 120.0, 31.0, 120.0);
        assert_eq!(d, 111195.0);
        assert_eq!(d.fract(), 0.0);
    }

    #[test]
    fn test_bearing_cardinal() {
        assert!((bearing_deg(30.0, 120.0, 31.0, 120.0) - 0.0).abs() < 1e-9);
        assert!((bearing_deg(30.0, 120.0, 30.0, 121.0) - 90.0).abs() < 0.5);
        assert!((bearing_deg(30.0, 120.0, 29.0, 120.0) - 180.0).abs() < 1e-9);
        assert!((bearing_deg(30.0, 120.0, 30.0, 119.0) - 270.0).abs() < 0.5);
    }

    #[test]
    fn test_bearing_range() {
        let b = bearing_deg(39.9, 116.3, 39.8, 116.2);
        assert!((0.0..360.0).contains(&b));
    }
}
