//! Device identity and connection parameters.
//!
//! A device is identified by its serial, the string adb reports for it.  The
//! registry keys its table on the *trimmed* serial, so `" ABC123 "` and
//! `"ABC123"` are the same device.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::port::DEFAULT_LOCAL_PORT_START;

/// Errors produced when validating a device serial.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SerialError {
    /// The serial is empty or contains only whitespace.
    #[error("device serial is empty")]
    Empty,
}

/// A validated device serial: non-empty and trimmed of surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceSerial(String);

impl DeviceSerial {
    /// Trims `raw` and rejects the result if it is empty.
    ///
    /// # Errors
    ///
    /// Returns [`SerialError::Empty`] for `""` or whitespace-only input.
    pub fn parse(raw: &str) -> Result<Self, SerialError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SerialError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The UTF-8 bytes fed to the port allocator's digest.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for DeviceSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceSerial {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeviceSerial {
    type Error = SerialError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DeviceSerial> for String {
    fn from(serial: DeviceSerial) -> Self {
        serial.0
    }
}

/// Logical size of the mirrored frame, in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Parameters for one attach attempt.
///
/// The caller builds this record; the registry may rewrite `serial` (to its
/// trimmed form), `use_reverse`, and `local_port` before moving it into the
/// session constructor.  The registry keeps no copy afterwards.
///
/// Everything below `local_port` is passed through to the session untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceParams {
    /// Serial of the device to attach.
    pub serial: String,
    /// Whether the device should connect back into a local port (reverse
    /// tunnel) instead of the client connecting out (forward tunnel).
    pub use_reverse: bool,
    /// Local end of the tunnel.
    pub local_port: u16,
    /// Maximum length of the longer frame side, `0` for unlimited.
    pub max_size: u16,
    /// Video bit rate in bits per second.
    pub bit_rate: u32,
    /// Frame-rate cap, `0` for unlimited.
    pub max_fps: u32,
    /// Keep the device awake while mirroring.
    pub stay_awake: bool,
    /// Turn the device screen off once mirroring starts.
    pub close_screen: bool,
    /// Optional recording target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_file: Option<PathBuf>,
}

impl DeviceParams {
    /// Parameters for `serial` with every other field at its default.
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            ..Self::default()
        }
    }

    /// Builder-style toggle for the reverse tunnel.
    pub fn with_reverse(mut self, use_reverse: bool) -> Self {
        self.use_reverse = use_reverse;
        self
    }
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            serial: String::new(),
            use_reverse: true,
            local_port: DEFAULT_LOCAL_PORT_START,
            max_size: 720,
            bit_rate: 8_000_000,
            max_fps: 60,
            stay_awake: false,
            close_screen: false,
            record_file: None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
