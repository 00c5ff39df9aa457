//! Tracing subscriber setup: console always, daily-rolling file when a log
//! directory is configured.

use anyhow::Context;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use cuas_core::config::LogConfig;

const LOG_FILE_PREFIX: &str = "cuas";

/// Keeps the non-blocking file writer alive; hold it until exit.
pub struct LoggerGuard(#[allow(dead_code)] Option<WorkerGuard>);

/// Map a configured level onto a known one, falling back to `info`.
fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `config.level`.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<LoggerGuard> {
    let level = normalize_level(&config.level);
    let rust_log = std::env::var("RUST_LOG").unwrap_or_default();

    let builder = EnvFilter::builder().with_default_directive(
        level
            .parse()
            .with_context(|| format!("invalid log level '{level}'"))?,
    );

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_filter(builder.clone().parse_lossy(&rust_log));

    let (file_layer, guard) = match &config.dir {
        Some(dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_FILE_PREFIX)
                .filename_suffix("log")
                .build(dir)
                .with_context(|| format!("creating log appender in {dir}"))?;
            let (non_blocking, guard) = NonBlocking::new(appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(builder.parse_lossy(&rust_log));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    if level != config.level.trim().to_ascii_lowercase() {
        tracing::warn!(configured = %config.level, "invalid log level, defaulting to 'info'");
    }

    Ok(LoggerGuard(guard))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_level() {
        assert_eq!(normalize_level("debug"), "debug");
        assert_eq!(normalize_level(" WARN "), "warn");
        assert_eq!(normalize_level("loud"), "info");
        assert_eq!(normalize_level(""), "info");
    }
}
