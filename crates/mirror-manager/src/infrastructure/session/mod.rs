//! Session implementations.
//!
//! The production session (server push, tunnel setup, handshake, media
//! stream) lives outside this crate and plugs in through
//! [`mirror_core::SessionFactory`].  This module only carries the
//! simulated session used for headless runs and tests.

pub mod simulated;

pub use simulated::{SimulatedBehaviour, SimulatedSession, SimulatedSessionFactory};
