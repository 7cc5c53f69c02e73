//! Application layer of the device manager.
//!
//! Depends only on the contracts in `mirror_core` (sessions, media
//! subsystem), never on concrete infrastructure.
//!
//! # Sub-modules
//!
//! - **`device_registry`** – The serial → session table: attach validation,
//!   reverse-tunnel port assignment, session ownership, and relaying session
//!   lifecycle events to observers.
//!
//! - **`device_manager`** – The process-wide instance wrapping the registry
//!   and owning the media subsystem's one-time init/teardown.

pub mod device_manager;
pub mod device_registry;
