//! # mirror-core
//!
//! Shared library for the mirror device manager containing device identity,
//! reverse-tunnel port allocation, and the contracts of the two external
//! collaborators the registry drives: the per-device session and the
//! process-wide media subsystem.
//!
//! This crate has zero dependencies on OS APIs, UI frameworks, or network
//! sockets.  Everything in it can be tested without a device attached.
//!
//! # Architecture overview
//!
//! A screen-mirroring client can show several remote devices at once.  Each
//! device is identified by its serial and reached through a network tunnel.
//! The registry in `mirror-manager` owns one session per serial; this crate
//! defines what it talks to:
//!
//! - **`domain`** – Device serials, connection parameters, and the
//!   [`PortAllocator`] that derives a reverse-tunnel port from a serial.
//!
//! - **`session`** – The [`Session`] and [`SessionFactory`] traits, plus the
//!   [`SessionEventSink`] through which a session reports "connected" and
//!   "disconnected" from whatever thread it runs its handshake on.
//!
//! - **`media`** – The [`MediaSubsystem`] trait: one `init`, one `de_init`.
//!
//! - **`event`** – [`DeviceEvent`], what observers of the registry receive.

pub mod domain;
pub mod event;
pub mod media;
pub mod session;

pub use domain::device::{DeviceParams, DeviceSerial, FrameSize, SerialError};
pub use domain::port::{PortAllocator, DEFAULT_LOCAL_PORT_START};
pub use event::DeviceEvent;
pub use media::MediaSubsystem;
pub use session::{Session, SessionEvent, SessionEventKind, SessionEventSink, SessionFactory, SessionId};
