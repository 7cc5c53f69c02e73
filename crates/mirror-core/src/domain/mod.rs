//! Domain entities for the mirror device manager.
//!
//! This module contains pure business logic with no infrastructure
//! dependencies: it can be compiled and tested on any platform without a
//! device, an adb server, or a network.

/// Device identity and per-attempt connection parameters.
pub mod device;

/// Deterministic reverse-tunnel port derivation.
///
/// See [`port::PortAllocator`] for the main type.
pub mod port;
