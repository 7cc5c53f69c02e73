//! Reverse-tunnel port allocation.
//!
//! When a device connects back into the client (reverse tunnel), the client
//! must listen on a local port that no other attached device uses.  Instead
//! of coordinating a shared pool, the port is derived from the serial:
//!
//! ```text
//! digest = SHA-256(serial as UTF-8)
//! h      = (digest[0] << 8) | digest[1]
//! port   = range_start + (h mod (65536 - range_start))
//! ```
//!
//! The same serial therefore always maps to the same port for a given
//! `range_start`, and different serials spread over `[range_start, 65535]`.
//! Allocation never fails.  Whether the port is actually usable (bindable,
//! forwardable) is judged by the caller, which downgrades to a forward
//! tunnel rather than retrying the allocator.

use sha2::{Digest, Sha256};

use super::device::DeviceSerial;

/// Default first port of the reverse-tunnel range.
pub const DEFAULT_LOCAL_PORT_START: u16 = 27183;

/// Number of values a `u16` port can take.
const PORT_SPACE: u32 = 1 << 16;

/// Derives a deterministic local port from a device serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAllocator {
    /// First port of the range (inclusive); the range always ends at 65535.
    range_start: u16,
}

impl PortAllocator {
    pub fn new(range_start: u16) -> Self {
        Self { range_start }
    }

    pub fn range_start(&self) -> u16 {
        self.range_start
    }

    /// Returns the port for `serial`, always within `[range_start, 65535]`.
    pub fn allocate(&self, serial: &DeviceSerial) -> u16 {
        let digest = Sha256::digest(serial.as_bytes());
        let h = u32::from(u16::from_be_bytes([digest[0], digest[1]]));
        let start = u32::from(self.range_start);
        let port = start + h % (PORT_SPACE - start);
        // start + (PORT_SPACE - start - 1) is at most 65535.
        port as u16
    }

    /// Returns `true` if `port` lies in `[range_start, 65535]`.
    ///
    /// Port 0 is never in range, even with `range_start == 0`: it means "any
    /// port" to the OS and cannot be forwarded.
    pub fn is_in_range(&self, port: u16) -> bool {
        port != 0 && port >= self.range_start
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_PORT_START)
    }
}
