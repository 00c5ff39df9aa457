//! Live-track table: correlates sightings by (serial, device).
//!
//! Pure state, no locking and no I/O. The server wraps one `TrackTable` in a
//! `RwLock` and resolves the owning sensor through the registry before taking
//! the write lock.
//!
//! The first sighting of a key inserts a track without geometry; only later
//! sightings merge and compute sensor geometry. Tracks are never evicted.

use std::collections::HashMap;

use crate::config::MapDatum;
use crate::geo;
use crate::registry::SensorSite;
use crate::types::*;

/// Aircraft longitude at or below this is not trusted for a bearing.
const BEARING_MIN_LON: f64 = 0.1;

// ---------------------------------------------------------------------------
// Update outcome
// ---------------------------------------------------------------------------

/// What `TrackTable::update` did with a sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// New key; track stored without geometry.
    Inserted,
    /// Existing track updated and geometry recomputed.
    Merged,
    /// Sighting dropped; carries the reason.
    Ignored(&'static str),
}

// ---------------------------------------------------------------------------
// Merge + geometry
// ---------------------------------------------------------------------------

/// Overwrite the mutable fields of `track` with `new`.
///
/// Positions, kinematics, RF, QR image, trail and whitelist flag always take
/// the new values. Model only changes when the new one is non-empty;
/// classification only when the new sighting has a fix.
pub fn merge_sighting(track: &mut LiveTrack, new: &SightingRecord, now: i64) {
    let s = &mut track.sighting;
    s.drone_gps = new.drone_gps;
    s.home_gps = new.home_gps;
    s.pilot_gps = new.pilot_gps;
    s.height = new.height;
    s.speed = new.speed;
    s.altitude = new.altitude;
    s.east_v = new.east_v;
    s.north_v = new.north_v;
    s.up_v = new.up_v;
    s.freq = new.freq;
    s.rssi = new.rssi;
    s.distance = new.distance;
    s.png = new.png.clone();
    s.trajectory = new.trajectory.clone();
    s.in_white_list = new.in_white_list;
    s.observed_at = new.observed_at;

    if !new.model.is_empty() {
        s.model = new.model.clone();
    }
    if let Some(t) = DroneType::classify(&new.drone_gps, &new.pilot_gps) {
        s.drone_type = t;
    }

    track.expires = now;
}

/// Distance and bearing from `site` to the aircraft at `drone`.
pub fn sensor_geometry(site: &SensorSite, drone: &Gps) -> SensorGeometry {
    let sensor_id = site.detection_id.to_string();

    if site.latitude == 0.0 || site.longitude == 0.0 {
        return SensorGeometry {
            sensor_id,
            distance: 0.0,
            azimuth: AZIMUTH_NO_DEVICE_LOCATION,
            ..Default::default()
        };
    }

    if drone.longitude <= BEARING_MIN_LON {
        return SensorGeometry {
            sensor_id,
            distance: 0.0,
            azimuth: AZIMUTH_NO_FIX,
            ..Default::default()
        };
    }

    SensorGeometry {
        sensor_id,
        distance: geo::distance_m(site.latitude, site.longitude, drone.latitude, drone.longitude),
        azimuth: geo::bearing_deg(site.latitude, site.longitude, drone.latitude, drone.longitude),
        device_lat: site.latitude,
        device_lon: site.longitude,
        ..Default::default()
    }
}

/// Copy of `track` with its positions expressed in `datum`.
pub fn project(track: &LiveTrack, datum: MapDatum) -> LiveTrack {
    let mut out = track.clone();
    if datum == MapDatum::Gcj02 {
        for gps in [
            &mut out.sighting.drone_gps,
            &mut out.sighting.home_gps,
            &mut out.sighting.pilot_gps,
        ] {
            if gps.has_fix() {
                let (lon, lat) = geo::wgs84_to_gcj02(gps.longitude, gps.latitude);
                *gps = Gps::new(lon, lat);
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Track table
// ---------------------------------------------------------------------------

/// All live tracks, in first-seen order.
#[derive(Debug, Default)]
pub struct TrackTable {
    tracks: Vec<LiveTrack>,
    index: HashMap<(String, String), usize>,

    // Counters
    pub inserted: u64,
    pub merged: u64,
    pub ignored: u64,
}

impl TrackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge one sighting.
    ///
    /// `site` is the owning sensor of `sighting.device`, resolved by the
    /// caller. A merge without a site is dropped and leaves the track as is.
    pub fn update(
        &mut self,
        sighting: SightingRecord,
        site: Option<&SensorSite>,
        now: i64,
    ) -> TrackOutcome {
        let key = (sighting.serial.clone(), sighting.device.clone());

        let outcome = match self.index.get(&key).copied() {
            Some(idx) => match site {
                Some(site) => {
                    let track = &mut self.tracks[idx];
                    merge_sighting(track, &sighting, now);
                    track.geometry = sensor_geometry(site, &track.sighting.drone_gps);
                    TrackOutcome::Merged
                }
                None => TrackOutcome::Ignored("owning sensor not registered"),
            },
            None if sighting.serial.is_empty() => TrackOutcome::Ignored("missing serial"),
            None if sighting.model.is_empty() => TrackOutcome::Ignored("missing model"),
            None => {
                self.index.insert(key, self.tracks.len());
                self.tracks.push(LiveTrack {
                    sighting,
                    geometry: SensorGeometry::default(),
                    expires: now,
                });
                TrackOutcome::Inserted
            }
        };

        match outcome {
            TrackOutcome::Inserted => self.inserted += 1,
            TrackOutcome::Merged => self.merged += 1,
            TrackOutcome::Ignored(_) => self.ignored += 1,
        }
        outcome
    }

    pub fn get(&self, serial: &str, device: &str) -> Option<&LiveTrack> {
        self.index
            .get(&(serial.to_string(), device.to_string()))
            .map(|&i| &self.tracks[i])
    }

    /// Point-in-time copy of every track in `datum`.
    pub fn snapshot(&self, datum: MapDatum) -> Vec<LiveTrack> {
        self.tracks.iter().map(|t| project(t, datum)).collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
