//! TOML-based configuration for atv-remote.
//!
//! The config file lives beside the credential file in the per-user
//! configuration directory:
//! - Windows:  `%APPDATA%\atv-remote\config.toml`
//! - Linux:    `~/.config/atv-remote/config.toml`
//! - macOS:    `~/Library/Application Support/atv-remote/config.toml`
//!
//! Example:
//!
//! ```toml
//! [general]
//! log_level = "debug"
//!
//! [device]
//! scan_timeout_secs = 5
//!
//! [capture]
//! stream_interval_ms = 500
//! default_quality = 70
//! ```
//!
//! Every field has a serde default, so a missing file, a missing section,
//! or a missing key all fall back to the built-in values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const APP_DIR_NAME: &str = "atv-remote";
const CONFIG_FILE_NAME: &str = "config.toml";
const CREDENTIALS_FILE_NAME: &str = "credentials.json";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub capture: CaptureSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Discovery, pairing, and device tool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSettings {
    /// Bound on discovery scoped to one device (pair, connect).
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,
    /// Bound on a full network scan (device listing).
    #[serde(default = "default_network_scan_timeout_secs")]
    pub network_scan_timeout_secs: u64,
    /// Bound on `begin()` of a pairing handshake.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// pyatv scripting tool used for scan, commands, and metadata.
    #[serde(default = "default_atvscript")]
    pub atvscript: String,
    /// pyatv interactive tool used for the pairing handshake.
    #[serde(default = "default_atvremote")]
    pub atvremote: String,
}

/// Screen capture and streaming settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureSettings {
    #[serde(default = "default_capture_timeout_secs")]
    pub timeout_secs: u64,
    /// Sleep between iterations of a streaming loop.
    #[serde(default = "default_stream_interval_ms")]
    pub stream_interval_ms: u64,
    /// Frames wider than this are downscaled, preserving aspect ratio.
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    /// JPEG quality used by streams and by captures without an explicit one.
    #[serde(default = "default_quality")]
    pub default_quality: u8,
    /// Python interpreter that runs `pymobiledevice3`.
    #[serde(default = "default_python")]
    pub python: String,
    /// Wait after spawning the tunnel daemon before checking it is alive.
    #[serde(default = "default_tunnel_grace_ms")]
    pub tunnel_grace_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_scan_timeout_secs() -> u64 {
    3
}
fn default_network_scan_timeout_secs() -> u64 {
    5
}
fn default_handshake_timeout_secs() -> u64 {
    10
}
fn default_atvscript() -> String {
    "atvscript".to_string()
}
fn default_atvremote() -> String {
    "atvremote".to_string()
}
fn default_capture_timeout_secs() -> u64 {
    5
}
fn default_stream_interval_ms() -> u64 {
    200
}
fn default_max_width() -> u32 {
    800
}
fn default_quality() -> u8 {
    85
}
fn default_python() -> String {
    "python3".to_string()
}
fn default_tunnel_grace_ms() -> u64 {
    2000
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            scan_timeout_secs: default_scan_timeout_secs(),
            network_scan_timeout_secs: default_network_scan_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            atvscript: default_atvscript(),
            atvremote: default_atvremote(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_capture_timeout_secs(),
            stream_interval_ms: default_stream_interval_ms(),
            max_width: default_max_width(),
            default_quality: default_quality(),
            python: default_python(),
            tunnel_grace_ms: default_tunnel_grace_ms(),
        }
    }
}

impl DeviceSettings {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn network_scan_timeout(&self) -> Duration {
        Duration::from_secs(self.network_scan_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

impl CaptureSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stream_interval(&self) -> Duration {
        Duration::from_millis(self.stream_interval_ms)
    }

    pub fn tunnel_grace(&self) -> Duration {
        Duration::from_millis(self.tunnel_grace_ms)
    }
}

// ── Paths ─────────────────────────────────────────────────────────────────────

/// Determines the per-user directory holding the config and credential files.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Canonical location of the credential file: beside `config_file`.
pub fn credentials_path_for(config_file: &Path) -> PathBuf {
    config_file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(CREDENTIALS_FILE_NAME)
}

/// Location used by earlier releases: `credentials.json` in the working
/// directory.  Only read during migration.
pub fn legacy_credentials_path() -> PathBuf {
    PathBuf::from(CREDENTIALS_FILE_NAME)
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

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join(APP_DIR_NAME))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join(APP_DIR_NAME))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join(APP_DIR_NAME)
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

    #[test]
    fn test_app_config_default_has_expected_timeouts() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.device.scan_timeout(), Duration::from_secs(3));
        assert_eq!(cfg.device.network_scan_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.device.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.capture.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_capture_defaults_match_streaming_behaviour() {
        let cfg = CaptureSettings::default();
        assert_eq!(cfg.stream_interval(), Duration::from_millis(200));
        assert_eq!(cfg.max_width, 800);
        assert_eq!(cfg.default_quality, 85);
        assert_eq!(cfg.python, "python3");
        assert_eq!(cfg.tunnel_grace(), Duration::from_secs(2));
    }

    #[test]
    fn test_general_config_default_log_level_is_info() {
        assert_eq!(GeneralConfig::default().log_level, "info");
    }

    #[test]
    fn test_partial_toml_fills_missing_fields_with_defaults() {
        // Arrange
        let toml_str = r#"
            [capture]
            default_quality = 60
        "#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("parse");

        // Assert
        assert_eq!(cfg.capture.default_quality, 60);
        assert_eq!(cfg.capture.max_width, 800);
        assert_eq!(cfg.device, DeviceSettings::default());
        assert_eq!(cfg.general.log_level, "info");
    }

    #[test]
    fn test_load_config_from_missing_file_returns_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_config_from(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_load_config_from_malformed_file_is_parse_error() {
        // Arrange
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[device\nscan_timeout_secs = ").expect("write");

        // Act
        let result = load_config_from(&path);

        // Assert
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_legacy_path_is_relative_to_working_directory() {
        assert_eq!(legacy_credentials_path(), PathBuf::from("credentials.json"));
    }

    #[test]
    fn test_credentials_live_beside_config_file() {
        let config = Path::new("/etc/atv-remote/config.toml");
        assert_eq!(
            credentials_path_for(config),
            PathBuf::from("/etc/atv-remote/credentials.json")
        );
    }
}
