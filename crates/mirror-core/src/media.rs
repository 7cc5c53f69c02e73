//! Contract of the process-wide media subsystem.
//!
//! The demuxer/decoder stack keeps global state (network init, codec
//! registration) that must be set up once before any session starts and torn
//! down once after the last session is gone.  The device manager owns that
//! lifetime; sessions never call these methods.

/// The process-wide media subsystem.
///
/// `init` and `de_init` are each called exactly once, in that order, for the
/// lifetime of the device manager.  There is no re-initialisation path.
pub trait MediaSubsystem: Send + Sync {
    /// One-time global initialisation.
    fn init(&self);
    /// One-time global teardown.
    fn de_init(&self);
}
