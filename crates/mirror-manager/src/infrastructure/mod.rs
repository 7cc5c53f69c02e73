//! Infrastructure layer for the device manager.
//!
//! Contains the adapters around the registry: configuration storage, the
//! media subsystem used by the binary, and the simulated session.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `mirror_core`, but MUST NOT be imported by the `application` layer.

pub mod media;
pub mod session;
pub mod storage;
