//! SQLite device table: the backing store for the device registry.
//!
//! The admin layer owns the rows; this daemon only reads them.

use rusqlite::{params, Connection, Result as SqlResult, Row};
use std::path::Path;
use uuid::Uuid;

use cuas_core::registry::DeviceRecord;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS devices (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    longitude REAL NOT NULL DEFAULT 0,
    latitude REAL NOT NULL DEFAULT 0,
    detection_id INTEGER UNIQUE,
    detection_ip TEXT NOT NULL DEFAULT '',
    detection_port INTEGER,
    parse_id INTEGER UNIQUE,
    parse_ip TEXT NOT NULL DEFAULT '',
    fpv_ip TEXT NOT NULL DEFAULT '',
    stream_server_ip TEXT NOT NULL DEFAULT '',
    strike_ip TEXT NOT NULL DEFAULT '',
    strike_port INTEGER
);

CREATE INDEX IF NOT EXISTS idx_devices_parse_ip ON devices(parse_ip);
"#;

const COLUMNS: &str = "id, name, longitude, latitude, detection_id, detection_ip, \
     detection_port, parse_id, parse_ip, fpv_ip, stream_server_ip, strike_ip, strike_port";

/// Handle on the device database.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &str) -> SqlResult<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            // Ensure parent directory exists
            if let Some(parent) = Path::new(path).parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            Connection::open(path)?
        };

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Database { conn })
    }

    /// Open in-memory database (for testing).
    #[cfg(test)]
    pub fn open_memory() -> SqlResult<Self> {
        Self::open(":memory:")
    }

    /// Insert or replace one device row.
    #[cfg(test)]
    pub fn upsert_device(&self, d: &DeviceRecord) -> SqlResult<()> {
        self.conn.execute(
            &format!("INSERT OR REPLACE INTO devices ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"),
            params![
                d.id.to_string(),
                d.name,
                d.longitude,
                d.latitude,
                d.detection_id,
                d.detection_ip,
                d.detection_port,
                d.parse_id,
                d.parse_ip,
                d.fpv_ip,
                d.stream_server_ip,
                d.strike_ip,
                d.strike_port,
            ],
        )?;
        Ok(())
    }

    /// Every device row, ordered by name.
    pub fn load_devices(&self) -> SqlResult<Vec<DeviceRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {COLUMNS} FROM devices ORDER BY name, id"))?;
        let rows = stmt.query_map([], row_to_device)?;
        rows.collect()
    }

    #[cfg(test)]
    pub fn device_count(&self) -> i64 {
        self.conn
            .query_row("SELECT COUNT(*) FROM devices", [], |r| r.get(0))
            .unwrap_or(0)
    }
}

fn row_to_device(row: &Row<'_>) -> SqlResult<DeviceRecord> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id).unwrap_or_else(|_| {
        tracing::warn!(id = %id, "device row has a non-UUID id");
        Uuid::nil()
    });
    Ok(DeviceRecord {
        id,
        name: row.get(1)?,
        longitude: row.get(2)?,
        latitude: row.get(3)?,
        detection_id: row.get(4)?,
        detection_ip: row.get(5)?,
        detection_port: row.get(6)?,
        parse_id: row.get(7)?,
        parse_ip: row.get(8)?,
        fpv_ip: row.get(9)?,
        stream_server_ip: row.get(10)?,
        strike_ip: row.get(11)?,
        strike_port: row.get(12)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
