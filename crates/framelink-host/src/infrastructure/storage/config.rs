//! TOML-based configuration persistence for the host.
//!
//! Reads and writes [`HostConfig`] to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Framelink\config.toml`
//! - Linux:    `~/.config/framelink/config.toml`
//! - macOS:    `~/Library/Application Support/Framelink/config.toml`
//!
//! Every field has a serde default, so a missing file, an empty file, and an
//! older file without newer fields all load.  The defaults publish frames on
//! `tcp://*:5555` and subscribe to commands from `tcp://127.0.0.1:5556`:
//!
//! ```toml
//! [host]
//! tick_rate_hz = 30
//! ack_endpoint = "acks"
//!
//! [[endpoints]]
//! name = "frames"
//! role = "publisher"
//! address = "tcp://*:5555"
//!
//! [[endpoints]]
//! name = "commands"
//! role = "subscriber"
//! address = "tcp://127.0.0.1:5556"
//!
//! [[cameras]]
//! id = "camera0"
//! endpoint = "frames"
//! width = 1024
//! height = 1024
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use framelink_core::domain::LUMA_COEFFICIENTS;
use framelink_session::config::{load_or_default, save};
use framelink_session::transport::{EndpointConfig, SocketRole};
use serde::{Deserialize, Serialize};

pub use framelink_session::config::{config_dir, ConfigError, ReconnectConfig};

use crate::infrastructure::image_encoding::{OutputFormat, DEFAULT_JPEG_QUALITY};

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level host configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    #[serde(default)]
    pub host: HostSettings,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default = "default_cameras")]
    pub cameras: Vec<CameraConfig>,
}

/// Tick loop and dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostSettings {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Host ticks per second.
    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: u32,
    /// Grace period for unsent messages at shutdown.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Upper bound on commands handled per tick, per endpoint.
    #[serde(default = "default_max_commands_per_tick")]
    pub max_commands_per_tick: usize,
    /// Upper bound on one handler's execution time.
    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,
    /// Publisher that carries replies to commands received by subscribers.
    #[serde(default = "default_ack_endpoint", skip_serializing_if = "Option::is_none")]
    pub ack_endpoint: Option<String>,
    /// Quality of `jpeg` and `grayscale_jpeg` frames, 1 to 100.
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

/// One published camera.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CameraConfig {
    /// Camera id, also the frame topic.
    pub id: String,
    /// Name of the publisher endpoint carrying this camera's frames.
    #[serde(default = "default_frame_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_capture_size")]
    pub width: u32,
    #[serde(default = "default_capture_size")]
    pub height: u32,
    /// Publish on every Nth tick.
    #[serde(default = "default_every_n_ticks")]
    pub every_n_ticks: u32,
    /// Minimum time between published frames.  0 disables the limit.
    #[serde(default)]
    pub min_interval_ms: u64,
    #[serde(default)]
    pub format: OutputFormat,
    /// `[R, G, B]` weights for grayscale outputs.
    #[serde(default = "default_grayscale_coefficients")]
    pub grayscale_coefficients: [f32; 3],
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_tick_rate_hz() -> u32 {
    30
}
fn default_drain_timeout_ms() -> u64 {
    500
}
fn default_max_commands_per_tick() -> usize {
    32
}
fn default_handler_timeout_ms() -> u64 {
    250
}
fn default_jpeg_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}
fn default_grayscale_coefficients() -> [f32; 3] {
    LUMA_COEFFICIENTS
}
fn default_ack_endpoint() -> Option<String> {
    Some("acks".to_string())
}
fn default_frame_endpoint() -> String {
    "frames".to_string()
}
fn default_capture_size() -> u32 {
    1024
}
fn default_every_n_ticks() -> u32 {
    1
}
fn default_true() -> bool {
    true
}

fn default_endpoints() -> Vec<EndpointConfig> {
    let mut acks = EndpointConfig::new("acks", SocketRole::Publisher, "tcp://*:5559");
    acks.enabled = false;
    vec![
        EndpointConfig::new("frames", SocketRole::Publisher, "tcp://*:5555"),
        EndpointConfig::new("commands", SocketRole::Subscriber, "tcp://127.0.0.1:5556"),
        acks,
    ]
}

fn default_cameras() -> Vec<CameraConfig> {
    vec![CameraConfig::new("camera0", "frames")]
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host: HostSettings::default(),
            reconnect: ReconnectConfig::default(),
            endpoints: default_endpoints(),
            cameras: default_cameras(),
        }
    }
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            tick_rate_hz: default_tick_rate_hz(),
            drain_timeout_ms: default_drain_timeout_ms(),
            max_commands_per_tick: default_max_commands_per_tick(),
            handler_timeout_ms: default_handler_timeout_ms(),
            ack_endpoint: default_ack_endpoint(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl CameraConfig {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            width: default_capture_size(),
            height: default_capture_size(),
            every_n_ticks: default_every_n_ticks(),
            min_interval_ms: 0,
            format: OutputFormat::default(),
            grayscale_coefficients: default_grayscale_coefficients(),
            enabled: true,
        }
    }
}

impl HostSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate_hz.max(1)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

impl HostConfig {
    /// The enabled endpoints, in file order.
    pub fn enabled_endpoints(&self) -> Vec<EndpointConfig> {
        self.endpoints.iter().filter(|e| e.enabled).cloned().collect()
    }

    /// Checks cross-references the type system cannot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let mut names = HashSet::new();
        for ep in &self.endpoints {
            if !names.insert(ep.name.as_str()) {
                return invalid(format!("duplicate endpoint name `{}`", ep.name));
            }
        }

        let mut camera_ids = HashSet::new();
        for cam in &self.cameras {
            if !camera_ids.insert(cam.id.as_str()) {
                return invalid(format!("duplicate camera id `{}`", cam.id));
            }
            if cam.width == 0 || cam.height == 0 {
                return invalid(format!("camera `{}` has a zero dimension", cam.id));
            }
            if cam.every_n_ticks == 0 {
                return invalid(format!("camera `{}`: every_n_ticks must be at least 1", cam.id));
            }
            let weights = cam.grayscale_coefficients;
            if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().sum::<f32>() <= 0.0 {
                return invalid(format!(
                    "camera `{}`: grayscale_coefficients must be non-negative and not all zero",
                    cam.id
                ));
            }
            let publisher = self
                .endpoints
                .iter()
                .find(|e| e.name == cam.endpoint && e.enabled && e.role == SocketRole::Publisher);
            if publisher.is_none() {
                return invalid(format!(
                    "camera `{}` needs an enabled publisher endpoint named `{}`",
                    cam.id, cam.endpoint
                ));
            }
        }

        if self.host.tick_rate_hz == 0 {
            return invalid("tick_rate_hz must be at least 1".to_string());
        }
        if !(1..=100).contains(&self.host.jpeg_quality) {
            return invalid("jpeg_quality must be between 1 and 100".to_string());
        }
        self.reconnect.validate()?;
        Ok(())
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the config from the default location.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<HostConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `HostConfig` from `path`, returning `HostConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<HostConfig, ConfigError> {
    load_or_default(path)
}

/// Persists `config` to the default location.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &HostConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Writes `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &HostConfig, path: &Path) -> Result<(), ConfigError> {
    save(config, path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
