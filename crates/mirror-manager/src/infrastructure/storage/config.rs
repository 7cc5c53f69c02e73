//! TOML-based configuration persistence for the device manager.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\MirrorManager\config.toml`
//! - Linux:    `~/.config/mirror-manager/config.toml`
//! - macOS:    `~/Library/Application Support/MirrorManager/config.toml`
//!
//! ```toml
//! [manager]
//! log_level = "info"
//! max_devices = 1000
//!
//! [tunnel]
//! local_port_start = 27183
//! probe_reverse_port = false
//!
//! [device]
//! use_reverse = true
//! max_size = 720
//! ```
//!
//! Every field carries a `#[serde(default = ...)]`, so the manager works on
//! first run (no file) and with files written by older versions.

use std::path::{Path, PathBuf};

use mirror_core::{DeviceParams, DEFAULT_LOCAL_PORT_START};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::device_registry::{
    RegistryConfig, DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_DEVICES,
};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub manager: ManagerSection,
    #[serde(default)]
    pub tunnel: TunnelSection,
    #[serde(default)]
    pub device: DeviceDefaults,
}

/// Registry limits and logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagerSection {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Maximum number of simultaneously attached devices.
    #[serde(default = "default_max_devices")]
    pub max_devices: usize,
    /// Capacity of the observer event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// Reverse-tunnel port settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TunnelSection {
    /// First port of the reverse-tunnel range; the range ends at 65535.
    #[serde(default = "default_local_port_start")]
    pub local_port_start: u16,
    /// Bind-test each allocated port and fall back to a forward tunnel if busy.
    #[serde(default)]
    pub probe_reverse_port: bool,
}

/// Defaults applied to devices attached from the command line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceDefaults {
    #[serde(default = "default_true")]
    pub use_reverse: bool,
    #[serde(default = "default_local_port_start")]
    pub local_port: u16,
    #[serde(default = "default_max_size")]
    pub max_size: u16,
    #[serde(default = "default_bit_rate")]
    pub bit_rate: u32,
    #[serde(default = "default_max_fps")]
    pub max_fps: u32,
    #[serde(default)]
    pub stay_awake: bool,
    #[serde(default)]
    pub close_screen: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_devices() -> usize {
    DEFAULT_MAX_DEVICES
}
fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}
fn default_local_port_start() -> u16 {
    DEFAULT_LOCAL_PORT_START
}
fn default_true() -> bool {
    true
}
fn default_max_size() -> u16 {
    720
}
fn default_bit_rate() -> u32 {
    8_000_000
}
fn default_max_fps() -> u32 {
    60
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            max_devices: default_max_devices(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for TunnelSection {
    fn default() -> Self {
        Self {
            local_port_start: default_local_port_start(),
            probe_reverse_port: false,
        }
    }
}

impl Default for DeviceDefaults {
    fn default() -> Self {
        Self {
            use_reverse: default_true(),
            local_port: default_local_port_start(),
            max_size: default_max_size(),
            bit_rate: default_bit_rate(),
            max_fps: default_max_fps(),
            stay_awake: false,
            close_screen: false,
        }
    }
}

impl AppConfig {
    /// Registry settings derived from the `[manager]` and `[tunnel]` sections.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_devices: self.manager.max_devices,
            local_port_start: self.tunnel.local_port_start,
            probe_reverse_port: self.tunnel.probe_reverse_port,
            event_capacity: self.manager.event_capacity,
        }
    }
}

impl DeviceDefaults {
    /// Connection parameters for `serial` built from these defaults.
    pub fn params_for(&self, serial: impl Into<String>) -> DeviceParams {
        DeviceParams {
            serial: serial.into(),
            use_reverse: self.use_reverse,
            local_port: self.local_port,
            max_size: self.max_size,
            bit_rate: self.bit_rate,
            max_fps: self.max_fps,
            stay_awake: self.stay_awake,
            close_screen: self.close_screen,
            record_file: None,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform config file.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to the platform config file.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config directory for this application.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("MirrorManager"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("mirror-manager"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("MirrorManager")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_config_path() -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("mirror_test_{}", Uuid::new_v4()));
        let path = dir.join("nested").join("config.toml");
        (dir, path)
    }

    #[test]
    fn test_app_config_default_matches_registry_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.registry_config(), RegistryConfig::default());
        assert_eq!(cfg.manager.log_level, "info");
    }

    #[test]
    fn test_device_defaults_build_params_for_serial() {
        let params = DeviceDefaults::default().params_for("ABC123");
        assert_eq!(params, DeviceParams::new("ABC123"));
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_partial_tunnel_section_overrides_defaults() {
        let toml_str = r#"
[tunnel]
local_port_start = 40000

[manager]
max_devices = 8
"#;
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");
        let registry = cfg.registry_config();
        assert_eq!(registry.local_port_start, 40000);
        assert_eq!(registry.max_devices, 8);
        assert!(!registry.probe_reverse_port);
        assert_eq!(cfg.device.bit_rate, 8_000_000);
    }

    #[test]
    fn test_device_section_controls_cli_params() {
        let toml_str = r#"
[device]
use_reverse = false
max_fps = 30
stay_awake = true
"#;
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize device");
        let params = cfg.device.params_for("R58M12");
        assert!(!params.use_reverse);
        assert_eq!(params.max_fps, 30);
        assert!(params.stay_awake);
        assert_eq!(params.max_size, 720);
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        let (dir, path) = temp_config_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_config_from_missing_file_returns_default() {
        let (_dir, path) = temp_config_path();
        let cfg = load_config_from(&path).expect("missing file is not an error");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_save_and_load_config_via_temp_dir() {
        let (dir, path) = temp_config_path();
        let mut cfg = AppConfig::default();
        cfg.manager.max_devices = 16;
        cfg.tunnel.probe_reverse_port = true;
        cfg.manager.log_level = "debug".to_string();

        save_config_to(&cfg, &path).expect("save creates parent dirs");
        let loaded = load_config_from(&path).expect("load");

        assert_eq!(loaded, cfg);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(
                path.ends_with("config.toml"),
                "config file must be named config.toml, got {path:?}"
            );
        }
        // NoPlatformConfigDir in a stripped CI environment is also acceptable.
    }
}
