//! RF spectrum warnings from the warning port.
//!
//! Sensors answer the `AT\r\n` greeting with acknowledgement lines, then
//! stream warnings such as `Waring,Freq 5025,RSSI 0.60`. Only events within
//! two seconds of the newest insert are retained.

use tracing::warn;

use crate::types::WarningEvent;

/// Greeting written to each sensor on connect.
pub const GREETING: &[u8] = b"AT\r\n";

/// Events further than this from the newest insert are dropped.
pub const WINDOW_SECS: i64 = 2;

const ACK_PREFIXES: [&str; 4] = ["AT+OK", "SET+OK", "OK", "AT+DEFAULT OK"];
const WARNING_PREFIX: &str = "Waring,Freq";
const FREQ_LABEL: &str = "Freq";
const RSSI_LABEL: &str = "RSSI";

/// True for command acknowledgements, which carry no data.
pub fn is_ack(line: &str) -> bool {
    ACK_PREFIXES.iter().any(|p| line.starts_with(p))
}

/// True when the line looks like a warning event.
pub fn is_warning(line: &str) -> bool {
    line.starts_with(WARNING_PREFIX) && line.contains(RSSI_LABEL)
}

/// Parse `Waring,Freq <f>,RSSI <r>` into an event for `ip` at `time`.
///
/// Returns `None` (with a warning log) unless the line has exactly three
/// comma-separated parts carrying both labels.
pub fn parse_warning(line: &str, ip: &str, time: i64) -> Option<WarningEvent> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() != 3 {
        warn!(line, parts = parts.len(), "warning line has wrong part count");
        return None;
    }

    let freq = parts[1].trim().strip_prefix(FREQ_LABEL);
    let rssi = parts[2].trim().strip_prefix(RSSI_LABEL);
    match (freq, rssi) {
        (Some(freq), Some(rssi)) => Some(WarningEvent {
            freq: freq.trim().to_string(),
            rssi: rssi.trim().to_string(),
            ip: ip.to_string(),
            time,
        }),
        _ => {
            warn!(line, "warning line missing Freq/RSSI label");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Sliding window
// ---------------------------------------------------------------------------

/// Warning events near the most recent insert.
#[derive(Debug, Default, Clone)]
pub struct WarningWindow {
    events: Vec<WarningEvent>,
}

impl WarningWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop events more than `WINDOW_SECS` from `event.time`, then append.
    pub fn push(&mut self, event: WarningEvent) {
        let now = event.time;
        self.events.retain(|e| (now - e.time).abs() <= WINDOW_SECS);
        self.events.push(event);
    }

    /// Point-in-time copy, oldest first.
    pub fn snapshot(&self) -> Vec<WarningEvent> {
        self.events.clone()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
