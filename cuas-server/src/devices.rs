//! Device cache refresher.
//!
//! CRUD handlers call `RefreshHandle::trigger` after a device write. The
//! signal channel holds at most one pending request, so a burst of writes
//! collapses into a single reload.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use cuas_core::registry::{DeviceRecord, DeviceRegistry};

use crate::db::Database;

/// Backing store for the device list.
#[async_trait]
pub trait DeviceSource: Send + Sync {
    async fn load(&self) -> anyhow::Result<Vec<DeviceRecord>>;
}

/// Reads the `devices` table from a SQLite file.
pub struct SqliteDeviceSource {
    path: PathBuf,
}

impl SqliteDeviceSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SqliteDeviceSource { path: path.into() }
    }
}

#[async_trait]
impl DeviceSource for SqliteDeviceSource {
    async fn load(&self) -> anyhow::Result<Vec<DeviceRecord>> {
        let path = self.path.display().to_string();
        let devices = tokio::task::spawn_blocking(move || {
            Database::open(&path).and_then(|db| db.load_devices())
        })
        .await??;
        Ok(devices)
    }
}

/// Sender side of the refresh signal.
#[derive(Clone)]
pub struct RefreshHandle {
    tx: mpsc::Sender<()>,
}

impl RefreshHandle {
    /// Request a reload. Returns false when one is already pending.
    pub fn trigger(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

/// Receiver side; run with `DeviceRefresher::run`.
pub struct DeviceRefresher {
    source: Arc<dyn DeviceSource>,
    registry: Arc<DeviceRegistry>,
    rx: mpsc::Receiver<()>,
}

impl DeviceRefresher {
    pub fn new(source: Arc<dyn DeviceSource>, registry: Arc<DeviceRegistry>) -> (Self, RefreshHandle) {
        let (tx, rx) = mpsc::channel(1);
        (
            DeviceRefresher {
                source,
                registry,
                rx,
            },
            RefreshHandle { tx },
        )
    }

    /// Reload the full list and swap it into the registry.
    pub async fn reload(&self) -> anyhow::Result<usize> {
        let devices = self.source.load().await?;
        let count = devices.len();
        self.registry.set_devices(devices);
        Ok(count)
    }

    /// Serve refresh signals until shutdown or until every handle is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                signal = self.rx.recv() => {
                    if signal.is_none() {
                        return;
                    }
                    match self.reload().await {
                        Ok(count) => info!(devices = count, "device list reloaded"),
                        Err(e) => error!(error = %e, "device reload failed, keeping cached list"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("device refresher stopped");
                        return;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
