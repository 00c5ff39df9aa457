//! Configuration file management for cuas.
//!
//! Reads/writes a TOML file (default `cuas.toml`) with listener ports,
//! device database path, decrypt service settings, snapshot datum and
//! logging. Every key has a default, so a missing file or section is fine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::encrypted::DEFAULT_FAILURE_THRESHOLD;
use crate::framing::MAX_LINE_BUFFER;
use crate::types::{CuasError, Result};

/// Default config file name, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "cuas.toml";

/// Full configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen: ListenConfig,
    pub devices: DevicesConfig,
    pub decrypt: DecryptConfig,
    pub tracks: TracksConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub host: String,
    /// Port carrying the three telemetry dialects.
    pub telemetry_port: u16,
    /// Port for RF warning sensors.
    pub warning_port: u16,
    pub read_timeout_secs: u64,
    pub max_line_buffer: usize,
}

impl Default for ListenConfig {
    fn default() -> Self {
        ListenConfig {
            host: "0.0.0.0".into(),
            telemetry_port: 9000,
            warning_port: 9001,
            read_timeout_secs: 30,
            max_line_buffer: MAX_LINE_BUFFER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    /// SQLite file holding the `devices` table.
    pub database: String,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        DevicesConfig {
            database: "data/cuas.db".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecryptConfig {
    /// Base URL of the login/decrypt service, e.g. `http://10.1.1.5:5000`.
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub refresh_hours: u64,
    pub timeout_secs: u64,
    pub failure_threshold: u32,
}

impl Default for DecryptConfig {
    fn default() -> Self {
        DecryptConfig {
            base_url: "http://127.0.0.1:5000".into(),
            username: String::new(),
            password: String::new(),
            refresh_hours: 24,
            timeout_secs: 10,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

/// Geodetic datum used for positions handed to the presentation layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapDatum {
    #[default]
    Wgs84,
    Gcj02,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracksConfig {
    pub map_datum: MapDatum,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
    /// Directory for daily-rolling log files. Console only when unset.
    pub dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".into(),
            dir: None,
        }
    }
}

/// Load config from `path`.
///
/// Returns the default config if the file doesn't exist; a file that
/// exists but fails to parse is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

/// Parse TOML config text.
pub fn parse_config(text: &str) -> Result<Config> {
    toml::from_str(text).map_err(|e| CuasError::Config(e.to_string()))
}

/// Save config to `path`, creating parent directories.
pub fn save_config(path: &Path, config: &Config) -> Result<PathBuf> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let body = toml::to_string_pretty(config).map_err(|e| CuasError::Config(e.to_string()))?;
    std::fs::write(path, format!("# cuas configuration\n\n{body}"))?;
    Ok(path.to_path_buf())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen.telemetry_port, 9000);
        assert_eq!(config.listen.read_timeout_secs, 30);
        assert_eq!(config.listen.max_line_buffer, 10 * 1024);
        assert_eq!(config.decrypt.refresh_hours, 24);
        assert_eq!(config.decrypt.failure_threshold, 20);
        assert_eq!(config.tracks.map_datum, MapDatum::Wgs84);
        assert!(config.log.dir.is_none());
    }

    #[test]
    fn test_parse_partial_config() {
        let text = r#"
[listen]
telemetry_port = 7100

[decrypt]
base_url = "http://10.1.1.5:5000"
username = "ops"

[tracks]
map_datum = "gcj02"
"#;
        let config = parse_config(text).unwrap();
        assert_eq!(config.listen.telemetry_port, 7100);
        assert_eq!(config.listen.warning_port, 9001);
        assert_eq!(config.decrypt.base_url, "http://10.1.1.5:5000");
        assert_eq!(config.decrypt.username, "ops");
        assert_eq!(config.decrypt.timeout_secs, 10);
        assert_eq!(config.tracks.map_datum, MapDatum::Gcj02);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            parse_config("[listen\nport = 1"),
            Err(CuasError::Config(_))
        ));
        assert!(parse_config("[tracks]\nmap_datum = \"mercator\"").is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("cuas.toml");

        let mut config = Config::default();
        config.devices.database = "/var/lib/cuas/devices.db".into();
        config.log.dir = Some("/var/log/cuas".into());
        config.tracks.map_datum = MapDatum::Gcj02;

        save_config(&path, &config).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# cuas configuration"));

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
