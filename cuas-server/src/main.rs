//! cuas: counter-UAS telemetry ingestion daemon + offline decoder.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use tokio::sync::watch;
use tracing::{info, warn};

use cuas_core::config::{self, Config, DEFAULT_CONFIG_FILE};
use cuas_core::decode::{decode_line, Decoded};
use cuas_core::registry::DeviceRegistry;
use cuas_core::tracker::TrackTable;
use cuas_core::types::*;

mod client;
mod credential;
mod db;
mod devices;
mod listener;
mod logging;
mod telemetry;
mod warning;

use client::ServiceClient;
use devices::{DeviceRefresher, DeviceSource, SqliteDeviceSource};
use listener::ConnOptions;
use telemetry::TelemetryService;
use warning::WarningService;

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "cuas", version, about = "Counter-UAS telemetry ingestion and correlation")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true, env = "CUAS_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the telemetry and warning listeners until Ctrl-C
    Serve,

    /// Feed a capture file of telemetry lines through the decoders and print the track table
    Decode {
        /// Path to file containing telemetry lines (`-` for stdin)
        file: PathBuf,

        /// SQLite device database used to resolve sensor geometry
        #[arg(long)]
        devices: Option<String>,

        /// Print the live-track snapshot as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig { force } = cli.command {
        return cmd_init_config(&cli.config, force);
    }

    let config = config::load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let _guard = logging::init_logging(&config.log)?;

    match cli.command {
        Commands::Serve => cmd_serve(config).await,
        Commands::Decode {
            file,
            devices,
            json,
        } => cmd_decode(&file, devices.as_deref(), json, &config),
        Commands::InitConfig { .. } => Ok(()),
    }
}

fn cmd_init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let written = config::save_config(path, &Config::default())?;
    println!("Wrote {}", written.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

async fn cmd_serve(config: Config) -> anyhow::Result<()> {
    let registry = Arc::new(DeviceRegistry::new());
    let client = Arc::new(ServiceClient::new(&config.decrypt).context("building HTTP client")?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Devices: initial load, then reload on signal.
    let source: Arc<dyn DeviceSource> =
        Arc::new(SqliteDeviceSource::new(&config.devices.database));
    let (refresher, refresh) = DeviceRefresher::new(source, registry.clone());
    match refresher.reload().await {
        Ok(count) => info!(devices = count, database = %config.devices.database, "device list loaded"),
        Err(e) => warn!(error = %e, database = %config.devices.database, "initial device load failed"),
    }
    tokio::spawn(refresher.run(shutdown_rx.clone()));
    spawn_hangup_reload(refresh, shutdown_rx.clone());

    tokio::spawn(credential::run(
        client.clone(),
        registry.clone(),
        refresh_interval(config.decrypt.refresh_hours),
        shutdown_rx.clone(),
    ));

    let telemetry = Arc::new(TelemetryService::new(
        registry.clone(),
        client,
        config.decrypt.failure_threshold,
        config.tracks.map_datum,
    ));
    let warnings = Arc::new(WarningService::new());
    let opts = ConnOptions::from(&config.listen);

    let telemetry_listener =
        listener::bind(&config.listen.host, config.listen.telemetry_port).await?;
    let warning_listener = listener::bind(&config.listen.host, config.listen.warning_port).await?;

    let telemetry_task = tokio::spawn(listener::serve(
        telemetry_listener,
        telemetry.clone(),
        opts,
        shutdown_rx.clone(),
    ));
    let warning_task = tokio::spawn(listener::serve(
        warning_listener,
        warnings.clone(),
        opts,
        shutdown_rx.clone(),
    ));
    tokio::spawn(status_loop(telemetry, warnings, registry, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(telemetry_task, warning_task);
    Ok(())
}

async fn status_loop(
    telemetry: Arc<TelemetryService>,
    warnings: Arc<WarningService>,
    registry: Arc<DeviceRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + STATUS_INTERVAL, STATUS_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                info!(
                    tracks = telemetry.track_count(),
                    warnings = warnings.warning_events().len(),
                    devices = registry.device_count(),
                    decrypt_failures = telemetry.decrypt_failures(),
                    credential = registry.token().is_some(),
                    "status"
                );
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// SIGHUP asks the refresher to reload the device list.
#[cfg(unix)]
fn spawn_hangup_reload(refresh: devices::RefreshHandle, mut shutdown: watch::Receiver<bool>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "SIGHUP handler unavailable");
            return;
        }
    };
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = hangup.recv() => {
                    if received.is_none() {
                        return;
                    }
                    if refresh.trigger() {
                        info!("SIGHUP: device reload requested");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_hangup_reload(_refresh: devices::RefreshHandle, _shutdown: watch::Receiver<bool>) {}

// ---------------------------------------------------------------------------
// decode
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DecodeStats {
    lines: u64,
    decoded: u64,
    encrypted: u64,
    rejected: u64,
}

fn cmd_decode(
    file: &Path,
    devices_db: Option<&str>,
    json: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let reader: Box<dyn BufRead> = if file.to_str() == Some("-") {
        Box::new(io::stdin().lock())
    } else {
        let f = std::fs::File::open(file)
            .with_context(|| format!("opening {}", file.display()))?;
        Box::new(io::BufReader::new(f))
    };

    let registry = DeviceRegistry::new();
    if let Some(path) = devices_db {
        let database = db::Database::open(path).with_context(|| format!("opening {path}"))?;
        registry.set_devices(database.load_devices()?);
    }

    let (table, stats) = replay(reader, &registry, unix_now())?;

    let tracks = table.snapshot(config.tracks.map_datum);
    if json {
        println!("{}", serde_json::to_string_pretty(&tracks)?);
    } else {
        print_summary(&tracks, &stats, &table);
    }
    Ok(())
}

/// Feed capture lines through the decoders into a fresh track table.
///
/// Lines that are not valid UTF-8 count as rejected; any other read error
/// aborts the replay.
fn replay<R: BufRead>(
    reader: R,
    registry: &DeviceRegistry,
    now: i64,
) -> anyhow::Result<(TrackTable, DecodeStats)> {
    let mut table = TrackTable::new();
    let mut stats = DecodeStats::default();

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                stats.lines += 1;
                stats.rejected += 1;
                continue;
            }
            Err(e) => return Err(e).context("reading capture"),
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        stats.lines += 1;

        match decode_line(line, now) {
            Ok(Decoded::Sighting(sighting)) => {
                stats.decoded += 1;
                let site = registry.resolve_sensor(&sighting.device);
                table.update(sighting, site.as_ref(), now);
            }
            // Offline mode never calls the decrypt service.
            Ok(Decoded::Encrypted(_)) => stats.encrypted += 1,
            Err(_) => stats.rejected += 1,
        }
    }
    Ok((table, stats))
}

/// Credential refresh period, at least one hour.
fn refresh_interval(hours: u64) -> Duration {
    Duration::from_secs(hours.max(1).saturating_mul(3600))
}

fn print_summary(tracks: &[LiveTrack], stats: &DecodeStats, table: &TrackTable) {
    println!();
    println!(
        "Lines: {} read, {} decoded, {} encrypted (not decrypted), {} rejected",
        stats.lines, stats.decoded, stats.encrypted, stats.rejected
    );
    println!(
        "Tracks: {} ({} inserted, {} merged, {} ignored)",
        tracks.len(),
        table.inserted,
        table.merged,
        table.ignored
    );
    println!();

    if tracks.is_empty() {
        return;
    }

    let mut out = Table::new();
    out.set_header(vec![
        "Serial", "Device", "Model", "Dialect", "Seen", "Freq", "RSSI", "Lat", "Lon", "Alt (m)",
        "Speed", "Dist (m)", "Azimuth",
    ]);

    for t in tracks {
        let s = &t.sighting;
        let fix = |v: f64| {
            if s.drone_gps.has_fix() {
                format!("{v:.5}")
            } else {
                "-".into()
            }
        };
        out.add_row(vec![
            Cell::new(&s.serial),
            Cell::new(if s.device.is_empty() { "-" } else { s.device.as_str() }),
            Cell::new(&s.model),
            Cell::new(s.dialect),
            Cell::new(drone_type_label(s.drone_type)),
            Cell::new(format!("{:.1}", s.freq)),
            Cell::new(format!("{:.1}", s.rssi)),
            Cell::new(fix(s.drone_gps.latitude)),
            Cell::new(fix(s.drone_gps.longitude)),
            Cell::new(format!("{:.0}", s.altitude)),
            Cell::new(format!("{:.1}", s.speed)),
            Cell::new(if t.geometry.sensor_id.is_empty() {
                "-".to_string()
            } else {
                format!("{:.0}", t.geometry.distance)
            }),
            Cell::new(azimuth_label(t)),
        ]);
    }

    println!("{out}");
}

fn drone_type_label(t: DroneType) -> &'static str {
    match t {
        DroneType::Unknown => "-",
        DroneType::PilotOnly => "pilot",
        DroneType::AircraftOnly => "aircraft",
        DroneType::Both => "both",
    }
}

fn azimuth_label(t: &LiveTrack) -> String {
    if t.geometry.sensor_id.is_empty() {
        return "-".into();
    }
    match t.geometry.azimuth {
        a if a == AZIMUTH_NO_FIX => "no fix".into(),
        a if a == AZIMUTH_NO_DEVICE_LOCATION => "no site".into(),
        a => format!("{a:.1}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["cuas", "decode", "capture.txt", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Decode { json: true, .. }));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));

        let cli = Cli::try_parse_from(["cuas", "--config", "/etc/cuas.toml", "serve"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve));
        assert_eq!(cli.config, PathBuf::from("/etc/cuas.toml"));
    }

    #[test]
    fn test_decode_capture_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.txt");
        std::fs::write(
            &path,
            "# capture\n\
             device=3, serial=AAA, model=DJI-Mini, drone_gps=116.4,39.9\n\
             device=3, serial=AAA, model=, drone_gps=116.5,39.9\n\
             freq=5745.5, rssi=-70, byte,1,2\n\
             nonsense\n",
        )
        .unwrap();
        cmd_decode(&path, None, true, &Config::default()).unwrap();
    }

    #[test]
    fn test_replay_counts_invalid_utf8_as_rejected() {
        let capture: &[u8] = b"device=3, serial=AAA, model=DJI-Mini, drone_gps=116.4,39.9\n\
                               \xff\xfe garbage\n\
                               device=3, serial=BBB, model=DJI-Air, drone_gps=116.5,39.9\n";
        let (table, stats) = replay(capture, &DeviceRegistry::new(), 1_000).unwrap();
        assert_eq!(stats.lines, 3);
        assert_eq!(stats.decoded, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_replay_stops_on_read_error() {
        struct BrokenPipe;
        impl io::Read for BrokenPipe {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            }
        }
        let reader = io::BufReader::new(BrokenPipe);
        assert!(replay(reader, &DeviceRegistry::new(), 1_000).is_err());
    }

    #[test]
    fn test_refresh_interval() {
        assert_eq!(refresh_interval(24), Duration::from_secs(24 * 3600));
        assert_eq!(refresh_interval(0), Duration::from_secs(3600));
        assert_eq!(refresh_interval(u64::MAX), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_init_config_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cuas.toml");
        cmd_init_config(&path, false).unwrap();
        assert!(cmd_init_config(&path, false).is_err());
        cmd_init_config(&path, true).unwrap();
        assert!(config::load_config(&path).is_ok());
    }

    #[test]
    fn test_azimuth_label() {
        let mut track = LiveTrack {
            sighting: SightingRecord::default(),
            geometry: SensorGeometry::default(),
            expires: 0,
        };
        assert_eq!(azimuth_label(&track), "-");
        track.geometry.sensor_id = "30".into();
        track.geometry.azimuth = AZIMUTH_NO_DEVICE_LOCATION;
        assert_eq!(azimuth_label(&track), "no site");
        track.geometry.azimuth = 12.34;
        assert_eq!(azimuth_label(&track), "12.3");
    }
}
