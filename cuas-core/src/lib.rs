//! cuas-core: Pure decode + correlation library for counter-UAS telemetry.
//!
//! No async, no sockets, no HTTP. Line framing, the three telemetry
//! dialects, the RF warning window, the device registry and the live-track
//! table live here; `cuas-server` wires them to TCP listeners and the
//! external decrypt service.

pub mod config;
pub mod decode;
pub mod encrypted;
pub mod fields;
pub mod framing;
pub mod geo;
pub mod plain;
pub mod qr;
pub mod registry;
pub mod remote_id;
pub mod tracker;
pub mod types;
pub mod warning;

// Re-export commonly used types at crate root
pub use decode::{classify, decode_line, Decoded};
pub use framing::LineBuffer;
pub use registry::{DeviceRecord, DeviceRegistry, SensorSite};
pub use tracker::{TrackOutcome, TrackTable};
pub use types::*;
pub use warning::WarningWindow;
