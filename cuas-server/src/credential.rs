//! Decrypt credential refresh loop.
//!
//! Logs in once at startup, then once per interval. A failed login keeps the
//! previous (possibly expired) token.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use cuas_core::registry::DeviceRegistry;

use crate::client::CredentialSource;

/// One login attempt; stores the token on success.
pub async fn refresh_once(source: &dyn CredentialSource, registry: &DeviceRegistry) -> bool {
    match source.login().await {
        Ok(token) => {
            registry.set_token(token);
            info!("decrypt credential refreshed");
            true
        }
        Err(e) => {
            error!(error = %e, "decrypt login failed, keeping previous credential");
            false
        }
    }
}

/// Refresh until `shutdown` flips to true.
pub async fn run(
    source: Arc<dyn CredentialSource>,
    registry: Arc<DeviceRegistry>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            // First tick fires immediately: the startup login.
            _ = ticker.tick() => {
                refresh_once(source.as_ref(), &registry).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("credential refresh stopped");
                    return;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
