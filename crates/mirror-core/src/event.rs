//! Events delivered to observers of the device registry.

use serde::{Deserialize, Serialize};

use crate::domain::device::FrameSize;

/// A lifecycle event for one attached device.
///
/// `Connected` is delivered at most once per attach attempt, `Disconnected` at
/// most once per live session, and only after a successful `Connected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// The session finished (or failed) its asynchronous handshake.
    ///
    /// With `success == false` the registry removes the entry for `serial`
    /// in the same dispatch step, right after sending the event.  By the
    /// time `process_events` returns, the entry is gone and the session has
    /// been dropped.
    Connected {
        success: bool,
        serial: String,
        device_name: String,
        size: FrameSize,
    },
    /// A live session lost its device.  As with a failed `Connected`, the
    /// entry is removed right after the event is sent.
    Disconnected { serial: String },
}

impl DeviceEvent {
    pub fn serial(&self) -> &str {
        match self {
            DeviceEvent::Connected { serial, .. } | DeviceEvent::Disconnected { serial } => serial,
        }
    }
}
