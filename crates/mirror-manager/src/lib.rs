//! mirror-manager library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.

pub mod application;
pub mod infrastructure;

pub use application::device_manager::DeviceManager;
pub use application::device_registry::{AttachError, DeviceHandle, DeviceRegistry, RegistryConfig};
