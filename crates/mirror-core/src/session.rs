//! Contract of the per-device session collaborator.
//!
//! A session represents one device's live connection: it pushes the server
//! to the device, sets up the tunnel, performs the handshake, and runs the
//! media stream.  None of that lives here.  The registry only needs to:
//!
//! 1. Build a session from [`DeviceParams`] through a [`SessionFactory`].
//! 2. Call [`Session::connect`], which may block for a bounded handshake step.
//! 3. Receive "connected" and "disconnected" notifications later.
//! 4. Drop the session when it is done with it.
//!
//! # Event marshalling
//!
//! Sessions usually finish their handshake on a worker thread.  They report
//! through a [`SessionEventSink`], a cheap handle around an `mpsc::Sender`, so
//! the events land in the registry's inbound queue and are handled on the
//! registry's own thread, never on the session's.
//!
//! ```text
//! worker thread                       registry thread
//! ─────────────                       ───────────────
//! sink.connected(name, size) ──mpsc──► process_events()
//!                                       └─ on_session_connected(...)
//! ```
//!
//! The sink is handed to the factory together with the parameters, so the
//! registry is subscribed before `connect` runs and no event can be missed.

use std::sync::mpsc::Sender;

use uuid::Uuid;

use crate::domain::device::{DeviceParams, DeviceSerial, FrameSize};

/// Identifies one constructed session, derived from UUID v4.
///
/// A serial can be attached, detached, and attached again; the session id
/// tells the registry which of those sessions an event belongs to.
pub type SessionId = Uuid;

/// What a session reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEventKind {
    /// The asynchronous handshake finished, successfully or not.
    Connected {
        success: bool,
        device_name: String,
        size: FrameSize,
    },
    /// A connected session lost its device.
    Disconnected,
}

/// A notification from a session to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub serial: DeviceSerial,
    pub kind: SessionEventKind,
}

/// Handle through which a session reports its lifecycle.
///
/// Cloneable and `Send`, so it can move into the session's worker threads.
/// Sending after the registry has gone away is silently ignored.
#[derive(Debug, Clone)]
pub struct SessionEventSink {
    session_id: SessionId,
    serial: DeviceSerial,
    tx: Sender<SessionEvent>,
}

impl SessionEventSink {
    pub fn new(session_id: SessionId, serial: DeviceSerial, tx: Sender<SessionEvent>) -> Self {
        Self {
            session_id,
            serial,
            tx,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn serial(&self) -> &DeviceSerial {
        &self.serial
    }

    /// Reports a successful handshake.
    pub fn connected(&self, device_name: impl Into<String>, size: FrameSize) -> bool {
        self.send(SessionEventKind::Connected {
            success: true,
            device_name: device_name.into(),
            size,
        })
    }

    /// Reports a handshake that failed after `connect` had returned `true`.
    pub fn connect_failed(&self) -> bool {
        self.send(SessionEventKind::Connected {
            success: false,
            device_name: String::new(),
            size: FrameSize::default(),
        })
    }

    /// Reports that a connected session lost its device.
    pub fn disconnected(&self) -> bool {
        self.send(SessionEventKind::Disconnected)
    }

    /// Returns `false` if the registry's receiver is gone.
    fn send(&self, kind: SessionEventKind) -> bool {
        let event = SessionEvent {
            session_id: self.session_id,
            serial: self.serial.clone(),
            kind,
        };
        match self.tx.send(event) {
            Ok(()) => true,
            Err(_) => {
                tracing::trace!(serial = %self.serial, "session event dropped: registry gone");
                false
            }
        }
    }
}

/// One device's live connection, owned exclusively by the registry.
///
/// Destruction is `Drop`.  Once `drop` begins the session must not emit any
/// further events; events already queued are discarded by the registry.
pub trait Session: Send {
    /// Synchronous connect step.  Returns `false` on immediate failure.
    ///
    /// May block for the duration of a bounded handshake step.  Must not call
    /// back into the registry.
    fn connect(&mut self) -> bool;

    /// The parameters this session was built from.  The session owns them.
    fn params(&self) -> &DeviceParams;

    /// The serial identifying this session's device.
    fn serial(&self) -> &str {
        &self.params().serial
    }
}

/// Builds sessions for the registry.
///
/// `events` is already bound to the new session's id and serial.
pub trait SessionFactory: Send {
    fn create(&self, params: DeviceParams, events: SessionEventSink) -> Box<dyn Session>;
}

impl<F> SessionFactory for F
where
    F: Fn(DeviceParams, SessionEventSink) -> Box<dyn Session> + Send,
{
    fn create(&self, params: DeviceParams, events: SessionEventSink) -> Box<dyn Session> {
        self(params, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn make_sink() -> (SessionEventSink, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel();
        let serial = DeviceSerial::parse("ABC123").unwrap();
        (SessionEventSink::new(Uuid::new_v4(), serial, tx), rx)
    }

    #[test]
    fn test_sink_tags_events_with_session_id_and_serial() {
        let (sink, rx) = make_sink();
        assert!(sink.connected("Pixel 7", FrameSize::new(1080, 2400)));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.session_id, sink.session_id());
        assert_eq!(event.serial.as_str(), "ABC123");
        assert_eq!(
            event.kind,
            SessionEventKind::Connected {
                success: true,
                device_name: "Pixel 7".to_string(),
                size: FrameSize::new(1080, 2400),
            }
        );
    }

    #[test]
    fn test_connect_failed_reports_unsuccessful_connected_event() {
        let (sink, rx) = make_sink();
        sink.connect_failed();
        assert!(matches!(
            rx.try_recv().unwrap().kind,
            SessionEventKind::Connected { success: false, .. }
        ));
    }

    #[test]
    fn test_sink_can_send_from_worker_thread() {
        let (sink, rx) = make_sink();
        let worker_sink = sink.clone();
        std::thread::spawn(move || {
            worker_sink.disconnected();
        })
        .join()
        .unwrap();
        assert_eq!(rx.recv().unwrap().kind, SessionEventKind::Disconnected);
    }

    #[test]
    fn test_send_after_receiver_dropped_returns_false() {
        let (sink, rx) = make_sink();
        drop(rx);
        assert!(!sink.disconnected());
    }

    struct FixedSession(DeviceParams);

    impl Session for FixedSession {
        fn connect(&mut self) -> bool {
            true
        }
        fn params(&self) -> &DeviceParams {
            &self.0
        }
    }

    #[test]
    fn test_closure_factory_builds_sessions() {
        let factory = |params: DeviceParams, _events: SessionEventSink| -> Box<dyn Session> {
            Box::new(FixedSession(params))
        };
        let (sink, _rx) = make_sink();
        let mut session = factory.create(DeviceParams::new("ABC123"), sink);
        assert!(session.connect());
        assert_eq!(session.serial(), "ABC123");
    }
}
