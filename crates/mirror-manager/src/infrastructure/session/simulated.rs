//! Simulated device session.
//!
//! Behaves like a real session from the registry's point of view: `connect`
//! returns immediately, the handshake "completes" on a worker thread after a
//! delay, and the result is reported through the [`SessionEventSink`].  It
//! can also be told to fail the handshake or to drop the device after a
//! while, which makes every registry path reachable without hardware.
//!
//! Dropping the session cancels the worker and joins it, so no event is sent
//! once teardown has begun.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mirror_core::{DeviceParams, FrameSize, Session, SessionEventSink, SessionFactory};
use tracing::{debug, error};

/// Granularity at which the worker checks for cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Script for one simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedBehaviour {
    /// Result of the synchronous connect step.
    pub connect_ok: bool,
    /// Result of the asynchronous handshake.
    pub handshake_ok: bool,
    /// Time between `connect` and the connected-event.
    pub handshake_delay: Duration,
    /// Reported device name; defaults to `"Simulated <serial>"`.
    pub device_name: Option<String>,
    /// Reported frame size.
    pub frame_size: FrameSize,
    /// If set, the device disconnects this long after a successful handshake.
    pub disconnect_after: Option<Duration>,
}

impl Default for SimulatedBehaviour {
    fn default() -> Self {
        Self {
            connect_ok: true,
            handshake_ok: true,
            handshake_delay: Duration::from_millis(50),
            device_name: None,
            frame_size: FrameSize::new(1080, 2340),
            disconnect_after: None,
        }
    }
}

/// A session that follows a [`SimulatedBehaviour`] script.
pub struct SimulatedSession {
    params: DeviceParams,
    behaviour: SimulatedBehaviour,
    events: SessionEventSink,
    cancelled: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedSession {
    pub fn new(params: DeviceParams, behaviour: SimulatedBehaviour, events: SessionEventSink) -> Self {
        Self {
            params,
            behaviour,
            events,
            cancelled: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl Session for SimulatedSession {
    fn connect(&mut self) -> bool {
        if !self.behaviour.connect_ok {
            debug!(serial = %self.params.serial, "simulated connect refused");
            return false;
        }

        let behaviour = self.behaviour.clone();
        let events = self.events.clone();
        let cancelled = Arc::clone(&self.cancelled);
        let device_name = behaviour
            .device_name
            .clone()
            .unwrap_or_else(|| format!("Simulated {}", self.params.serial));

        let spawned = thread::Builder::new()
            .name(format!("sim-session-{}", self.params.serial))
            .spawn(move || {
                if !sleep_unless_cancelled(&cancelled, behaviour.handshake_delay) {
                    return;
                }
                if !behaviour.handshake_ok {
                    events.connect_failed();
                    return;
                }
                events.connected(device_name, behaviour.frame_size);

                if let Some(after) = behaviour.disconnect_after {
                    if sleep_unless_cancelled(&cancelled, after) {
                        events.disconnected();
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                true
            }
            Err(e) => {
                error!(serial = %self.params.serial, "failed to spawn session worker: {e}");
                false
            }
        }
    }

    fn params(&self) -> &DeviceParams {
        &self.params
    }
}

impl Drop for SimulatedSession {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            // A panicking worker has nothing left to clean up.
            let _ = worker.join();
        }
        debug!(serial = %self.params.serial, "simulated session destroyed");
    }
}

/// Sleeps for `total`, returning `false` early if `cancelled` is set.
fn sleep_unless_cancelled(cancelled: &AtomicBool, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if cancelled.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(CANCEL_POLL.min(deadline - now));
    }
}

/// Builds [`SimulatedSession`]s, with optional per-serial scripts.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSessionFactory {
    default: SimulatedBehaviour,
    overrides: HashMap<String, SimulatedBehaviour>,
}

impl SimulatedSessionFactory {
    pub fn new(default: SimulatedBehaviour) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Uses `behaviour` for `serial` instead of the default script.
    pub fn with_override(mut self, serial: impl Into<String>, behaviour: SimulatedBehaviour) -> Self {
        self.overrides.insert(serial.into(), behaviour);
        self
    }
}

impl SessionFactory for SimulatedSessionFactory {
    fn create(&self, params: DeviceParams, events: SessionEventSink) -> Box<dyn Session> {
        let behaviour = self
            .overrides
            .get(&params.serial)
            .unwrap_or(&self.default)
            .clone();
        Box::new(SimulatedSession::new(params, behaviour, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::{DeviceSerial, SessionEvent, SessionEventKind};
    use std::sync::mpsc;
    use uuid::Uuid;

    fn make_session(behaviour: SimulatedBehaviour) -> (SimulatedSession, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel();
        let serial = DeviceSerial::parse("SIM01").unwrap();
        let sink = SessionEventSink::new(Uuid::new_v4(), serial, tx);
        (
            SimulatedSession::new(DeviceParams::new("SIM01"), behaviour, sink),
            rx,
        )
    }

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn test_refused_connect_sends_nothing() {
        let (mut session, rx) = make_session(SimulatedBehaviour {
            connect_ok: false,
            ..SimulatedBehaviour::default()
        });
        assert!(!session.connect());
        drop(session);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_successful_handshake_reports_name_and_size() {
        let (mut session, rx) = make_session(SimulatedBehaviour {
            handshake_delay: Duration::ZERO,
            ..SimulatedBehaviour::default()
        });
        assert!(session.connect());

        let event = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(
            event.kind,
            SessionEventKind::Connected {
                success: true,
                device_name: "Simulated SIM01".to_string(),
                size: FrameSize::new(1080, 2340),
            }
        );
    }

    #[test]
    fn test_failed_handshake_reports_unsuccessful_connect() {
        let (mut session, rx) = make_session(SimulatedBehaviour {
            handshake_ok: false,
            handshake_delay: Duration::ZERO,
            ..SimulatedBehaviour::default()
        });
        assert!(session.connect());
        assert!(matches!(
            rx.recv_timeout(WAIT).unwrap().kind,
            SessionEventKind::Connected { success: false, .. }
        ));
    }

    #[test]
    fn test_disconnect_follows_connect() {
        let (mut session, rx) = make_session(SimulatedBehaviour {
            handshake_delay: Duration::ZERO,
            disconnect_after: Some(Duration::from_millis(20)),
            ..SimulatedBehaviour::default()
        });
        session.connect();
        assert!(matches!(
            rx.recv_timeout(WAIT).unwrap().kind,
            SessionEventKind::Connected { success: true, .. }
        ));
        assert_eq!(rx.recv_timeout(WAIT).unwrap().kind, SessionEventKind::Disconnected);
    }

    #[test]
    fn test_drop_cancels_pending_handshake() {
        let (mut session, rx) = make_session(SimulatedBehaviour {
            handshake_delay: Duration::from_secs(30),
            ..SimulatedBehaviour::default()
        });
        session.connect();
        let started = Instant::now();
        drop(session);
        assert!(started.elapsed() < Duration::from_secs(5), "drop must not wait out the delay");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_factory_applies_per_serial_override() {
        let factory = SimulatedSessionFactory::default().with_override(
            "BAD",
            SimulatedBehaviour {
                connect_ok: false,
                ..SimulatedBehaviour::default()
            },
        );
        let (tx, _rx) = mpsc::channel();
        let sink = SessionEventSink::new(Uuid::new_v4(), DeviceSerial::parse("BAD").unwrap(), tx);
        let mut session = factory.create(DeviceParams::new("BAD"), sink);
        assert!(!session.connect());
    }
}
