//! In-memory device registry and the decrypt credential.
//!
//! Two independent tables, each behind its own `RwLock`. Lookups scan the
//! device list under a read lock; a refresh swaps the whole list under a
//! write lock. No method holds both locks.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One monitoring installation, as configured by the admin layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: Uuid,
    pub name: String,
    pub longitude: f64,
    pub latitude: f64,
    /// Detection sensor sub-identifier, unique across the fleet.
    pub detection_id: Option<i64>,
    pub detection_ip: String,
    pub detection_port: Option<u16>,
    /// Decoder ("parse" box) sub-identifier, unique across the fleet.
    pub parse_id: Option<i64>,
    pub parse_ip: String,
    pub fpv_ip: String,
    pub stream_server_ip: String,
    pub strike_ip: String,
    pub strike_port: Option<u16>,
}

impl DeviceRecord {
    /// Both coordinates set.
    pub fn has_location(&self) -> bool {
        self.latitude != 0.0 && self.longitude != 0.0
    }
}

/// Owning sensor resolved for a decoder sub-identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSite {
    pub detection_id: i64,
    pub latitude: f64,
    pub longitude: f64,
}

/// Shared device cache plus the current decrypt credential.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<Vec<DeviceRecord>>,
    token: RwLock<Option<String>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_devices(&self) -> RwLockReadGuard<'_, Vec<DeviceRecord>> {
        self.devices.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_devices(&self) -> RwLockWriteGuard<'_, Vec<DeviceRecord>> {
        self.devices.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the whole device list.
    pub fn set_devices(&self, devices: Vec<DeviceRecord>) {
        *self.write_devices() = devices;
    }

    /// Copy of the current device list.
    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.read_devices().clone()
    }

    pub fn device_count(&self) -> usize {
        self.read_devices().len()
    }

    /// Decoder sub-identifier registered for a decoder IP.
    pub fn parse_id_by_parse_ip(&self, ip: &str) -> Option<i64> {
        self.read_devices()
            .iter()
            .find(|d| d.parse_ip == ip)
            .and_then(|d| d.parse_id)
    }

    /// Detection sub-identifier of the installation owning a decoder.
    pub fn detection_id_by_parse_id(&self, parse_id: i64) -> Option<i64> {
        self.read_devices()
            .iter()
            .find(|d| d.parse_id == Some(parse_id))
            .and_then(|d| d.detection_id)
    }

    /// Full device record for a detection sub-identifier.
    pub fn device_by_detection_id(&self, detection_id: i64) -> Option<DeviceRecord> {
        self.read_devices()
            .iter()
            .find(|d| d.detection_id == Some(detection_id))
            .cloned()
    }

    /// Walk decoder id -> detection id -> device for a sighting's `device`
    /// field. `None` if any link is missing or the id is not numeric.
    pub fn resolve_sensor(&self, device: &str) -> Option<SensorSite> {
        let parse_id = device.trim().parse::<i64>().ok()?;
        let detection_id = self.detection_id_by_parse_id(parse_id)?;
        let record = self.device_by_detection_id(detection_id)?;
        Some(SensorSite {
            detection_id,
            latitude: record.latitude,
            longitude: record.longitude,
        })
    }

    // -- credential --

    /// Current decrypt token, if a login has ever succeeded.
    pub fn token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_token(&self, token: String) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
