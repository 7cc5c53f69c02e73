//! DeviceRegistry: serial-keyed table of live device sessions.
//!
//! The registry is the only owner of every session.  It validates attach
//! requests, derives the reverse-tunnel port, builds and connects the
//! session, and relays the session's lifecycle notifications to observers.
//!
//! # Slot lifecycle
//!
//! ```text
//! absent ──attach──► attaching ──connect() == true──► live
//!                        │                              │
//!                        └─ connect() == false ─► absent │
//!                                                        │
//!             absent ◄── detach (immediate drop) ────────┤
//!             absent ◄── failure / disconnect event ─────┘  (deferred drop)
//! ```
//!
//! An event-driven removal erases the slot *synchronously* inside the
//! handler, so a re-attach of the same serial succeeds right after the
//! handler returns.  The session object itself is only dropped once the
//! dispatch of that event has completed.
//!
//! # Threading
//!
//! All methods take `&mut self` or `&self` and run on the caller's thread.
//! Sessions report from their own threads through [`SessionEventSink`]s; the
//! events wait in an `mpsc` queue until [`DeviceRegistry::process_events`]
//! is called.

use std::collections::HashMap;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

use mirror_core::{
    DeviceEvent, DeviceParams, DeviceSerial, FrameSize, PortAllocator, Session, SessionEvent,
    SessionEventKind, SessionEventSink, SessionFactory, SessionId, DEFAULT_LOCAL_PORT_START,
};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default maximum number of simultaneously attached devices.
pub const DEFAULT_MAX_DEVICES: usize = 1000;

/// Default capacity of the observer broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Why an attach request was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachError {
    #[error("device serial is empty")]
    InvalidSerial,
    #[error("device {0} is already attached")]
    DuplicateSerial(String),
    #[error("over the maximum number of connections ({max})")]
    CapacityExceeded { max: usize },
    #[error("session for {0} failed to connect")]
    ConnectFailed(String),
    #[error("device manager has been shut down")]
    ShutDown,
}

/// Registry tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Upper bound on the table size.
    pub max_devices: usize,
    /// First port of the reverse-tunnel range.
    pub local_port_start: u16,
    /// Try to bind each allocated port before using it.
    pub probe_reverse_port: bool,
    /// Capacity of the observer broadcast channel.
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_devices: DEFAULT_MAX_DEVICES,
            local_port_start: DEFAULT_LOCAL_PORT_START,
            probe_reverse_port: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Snapshot of an attached device, safe to hand out of the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub serial: String,
    pub session_id: SessionId,
    pub use_reverse: bool,
    pub local_port: u16,
}

impl DeviceHandle {
    fn of(session_id: SessionId, session: &dyn Session) -> Self {
        let params = session.params();
        Self {
            serial: params.serial.clone(),
            session_id,
            use_reverse: params.use_reverse,
            local_port: params.local_port,
        }
    }
}

/// One table entry.
///
/// `session` is `None` only while the slot is being torn down; it is never a
/// second owner.
struct DeviceSlot {
    session_id: SessionId,
    session: Option<Box<dyn Session>>,
}

/// The serial → session table and its event relay.
pub struct DeviceRegistry {
    config: RegistryConfig,
    allocator: PortAllocator,
    factory: Box<dyn SessionFactory>,
    devices: HashMap<String, DeviceSlot>,
    /// Sessions removed by an event handler, dropped after the dispatch.
    pending_teardown: Vec<Box<dyn Session>>,
    session_tx: Sender<SessionEvent>,
    session_rx: Receiver<SessionEvent>,
    observers: broadcast::Sender<DeviceEvent>,
}

impl DeviceRegistry {
    pub fn new(config: RegistryConfig, factory: Box<dyn SessionFactory>) -> Self {
        let (session_tx, session_rx) = mpsc::channel();
        let (observers, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            allocator: PortAllocator::new(config.local_port_start),
            config,
            factory,
            devices: HashMap::new(),
            pending_teardown: Vec::new(),
            session_tx,
            session_rx,
            observers,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Subscribes a new observer to connect/disconnect events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.observers.subscribe()
    }

    // ── Attach / detach ──────────────────────────────────────────────────────

    /// Attaches a device, reporting only success or failure.
    ///
    /// The rejection reason is logged; use [`Self::try_attach`] to inspect it.
    pub fn attach(&mut self, params: DeviceParams) -> bool {
        match self.try_attach(params) {
            Ok(_) => true,
            Err(e) => {
                warn!("attach rejected: {e}");
                false
            }
        }
    }

    /// Validates `params`, builds the session, and connects it.
    ///
    /// # Errors
    ///
    /// Checks run in order and stop at the first failure:
    /// [`AttachError::InvalidSerial`], [`AttachError::DuplicateSerial`],
    /// [`AttachError::CapacityExceeded`], then [`AttachError::ConnectFailed`]
    /// if the session's synchronous connect step fails.  No slot exists for a
    /// rejected request.
    pub fn try_attach(&mut self, mut params: DeviceParams) -> Result<DeviceHandle, AttachError> {
        let serial =
            DeviceSerial::parse(&params.serial).map_err(|_| AttachError::InvalidSerial)?;
        if self.devices.contains_key(serial.as_str()) {
            return Err(AttachError::DuplicateSerial(serial.to_string()));
        }
        if self.devices.len() >= self.config.max_devices {
            return Err(AttachError::CapacityExceeded {
                max: self.config.max_devices,
            });
        }

        params.serial = serial.to_string();
        if params.use_reverse {
            let port = self.allocator.allocate(&serial);
            if self.is_port_usable(port) {
                info!(%serial, port, "reverse tunnel port allocated");
                params.local_port = port;
            } else {
                warn!(%serial, port, "no port available, automatically switch to forward");
                params.use_reverse = false;
            }
        }

        let session_id = Uuid::new_v4();
        let sink = SessionEventSink::new(session_id, serial.clone(), self.session_tx.clone());
        let mut session = self.factory.create(params, sink);
        if session.serial() != serial.as_str() {
            warn!(%serial, session_serial = session.serial(), "session reports a different serial");
        }

        if !session.connect() {
            drop(session);
            return Err(AttachError::ConnectFailed(serial.to_string()));
        }

        let handle = DeviceHandle::of(session_id, session.as_ref());
        info!(%serial, %session_id, reverse = handle.use_reverse, port = handle.local_port, "device attached");
        self.devices.insert(
            serial.to_string(),
            DeviceSlot {
                session_id,
                session: Some(session),
            },
        );
        Ok(handle)
    }

    /// Detaches `serial`, dropping its session before returning.
    ///
    /// Returns `false` if no live session is registered for `serial`.
    pub fn detach(&mut self, serial: &str) -> bool {
        let key = serial.trim();
        let Some(mut slot) = self.devices.remove(key) else {
            return false;
        };
        match slot.session.take() {
            Some(session) => {
                drop(session);
                info!(serial = key, session_id = %slot.session_id, "device detached");
                true
            }
            None => false,
        }
    }

    /// Drops every session, including those waiting for deferred teardown.
    pub fn detach_all(&mut self) {
        let count = self.devices.len();
        for (_, mut slot) in self.devices.drain() {
            drop(slot.session.take());
        }
        self.pending_teardown.clear();
        if count > 0 {
            info!(count, "all devices detached");
        }
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    /// Returns the live session for `serial`, if any.
    pub fn lookup(&self, serial: &str) -> Option<&dyn Session> {
        self.devices
            .get(serial.trim())
            .and_then(|slot| slot.session.as_deref())
    }

    /// Returns a snapshot of the device attached as `serial`, if any.
    pub fn handle(&self, serial: &str) -> Option<DeviceHandle> {
        let slot = self.devices.get(serial.trim())?;
        let session = slot.session.as_deref()?;
        Some(DeviceHandle::of(slot.session_id, session))
    }

    /// Serials of all attached devices, in arbitrary order.
    pub fn serials(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Number of removed sessions not yet dropped.
    pub fn pending_teardown(&self) -> usize {
        self.pending_teardown.len()
    }

    // ── Event dispatch ───────────────────────────────────────────────────────

    /// Dispatches every queued session event.  Returns how many were handled.
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.session_rx.try_recv() {
                Ok(event) => {
                    self.dispatch(event);
                    handled += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        handled
    }

    /// Waits up to `timeout` for the first event, then drains the queue.
    pub fn process_events_timeout(&mut self, timeout: Duration) -> usize {
        match self.session_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.dispatch(event);
                1 + self.process_events()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Handles one event, then drops whatever the handler scheduled.
    fn dispatch(&mut self, event: SessionEvent) {
        let SessionEvent {
            session_id,
            serial,
            kind,
        } = event;

        if !self.is_current(serial.as_str(), session_id) {
            debug!(%serial, %session_id, ?kind, "dropping event from a session that is no longer registered");
            return;
        }

        match kind {
            SessionEventKind::Connected {
                success,
                device_name,
                size,
            } => self.on_session_connected(success, serial.as_str(), &device_name, size),
            SessionEventKind::Disconnected => self.on_session_disconnected(serial.as_str()),
        }

        self.flush_teardown();
    }

    fn is_current(&self, serial: &str, session_id: SessionId) -> bool {
        self.devices
            .get(serial)
            .is_some_and(|slot| slot.session_id == session_id && slot.session.is_some())
    }

    fn on_session_connected(&mut self, success: bool, serial: &str, device_name: &str, size: FrameSize) {
        if success {
            info!(serial, device_name, %size, "device connected");
        } else {
            warn!(serial, "device handshake failed");
        }
        self.emit(DeviceEvent::Connected {
            success,
            serial: serial.to_string(),
            device_name: device_name.to_string(),
            size,
        });
        if !success {
            self.remove_entry(serial);
        }
    }

    fn on_session_disconnected(&mut self, serial: &str) {
        info!(serial, "device disconnected");
        self.emit(DeviceEvent::Disconnected {
            serial: serial.to_string(),
        });
        self.remove_entry(serial);
    }

    /// Erases the slot now and schedules its session for teardown.
    fn remove_entry(&mut self, serial: &str) {
        if let Some(mut slot) = self.devices.remove(serial) {
            if let Some(session) = slot.session.take() {
                debug!(serial, session_id = %slot.session_id, "session scheduled for teardown");
                self.pending_teardown.push(session);
            }
        }
    }

    fn flush_teardown(&mut self) {
        if !self.pending_teardown.is_empty() {
            debug!(count = self.pending_teardown.len(), "dropping removed sessions");
            self.pending_teardown.clear();
        }
    }

    fn emit(&self, event: DeviceEvent) {
        // `send` only fails when nobody is subscribed.
        if self.observers.send(event).is_err() {
            debug!("device event not delivered: no observers");
        }
    }

    fn is_port_usable(&self, port: u16) -> bool {
        if !self.allocator.is_in_range(port) {
            return false;
        }
        if !self.config.probe_reverse_port {
            return true;
        }
        TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.detach_all();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
