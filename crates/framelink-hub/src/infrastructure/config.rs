//! Hub configuration, stored as `hub.toml` next to the host's `config.toml`.
//!
//! The defaults pair with a host running its own defaults on the same
//! machine: the hub subscribes to the host's frames on port 5555 and
//! publishes commands on 5556, where the host's command subscriber connects.
//! Consumers subscribe to frames on 5557 and publish commands to 5558.
//!
//! ```toml
//! [hub]
//! camera_filter = ["front", "rear"]
//!
//! [upstream_frames]
//! name = "upstream_frames"
//! role = "subscriber"
//! address = "tcp://10.0.0.5:5555"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use framelink_session::config::{config_dir, load_or_default, save, ConfigError, ReconnectConfig};
use framelink_session::transport::{EndpointConfig, EndpointMode, SocketRole};

/// Top-level hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HubConfig {
    #[serde(default)]
    pub hub: HubSettings,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Subscribes to the host's frames.
    #[serde(default = "default_upstream_frames")]
    pub upstream_frames: EndpointConfig,
    /// Publishes commands to the host.
    #[serde(default = "default_upstream_control")]
    pub upstream_control: EndpointConfig,
    /// Republishes frames to consumers.
    #[serde(default = "default_downstream_frames")]
    pub downstream_frames: EndpointConfig,
    /// Receives commands from consumers.
    #[serde(default = "default_downstream_control")]
    pub downstream_control: EndpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HubSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Pause between relay passes.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Grace period for unsent messages at shutdown.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Upper bound on messages moved per direction in one pass.
    #[serde(default = "default_max_messages_per_poll")]
    pub max_messages_per_poll: usize,
    /// Camera ids to relay.  Empty relays every camera.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub camera_filter: Vec<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_poll_interval_ms() -> u64 {
    5
}
fn default_drain_timeout_ms() -> u64 {
    500
}
fn default_max_messages_per_poll() -> usize {
    256
}

fn default_upstream_frames() -> EndpointConfig {
    EndpointConfig::new("upstream_frames", SocketRole::Subscriber, "tcp://127.0.0.1:5555")
}
fn default_upstream_control() -> EndpointConfig {
    EndpointConfig::new("upstream_control", SocketRole::Publisher, "tcp://*:5556")
}
fn default_downstream_frames() -> EndpointConfig {
    EndpointConfig::new("downstream_frames", SocketRole::Publisher, "tcp://*:5557")
}
fn default_downstream_control() -> EndpointConfig {
    EndpointConfig::new("downstream_control", SocketRole::Subscriber, "tcp://*:5558")
        .with_mode(EndpointMode::Bind)
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            hub: HubSettings::default(),
            reconnect: ReconnectConfig::default(),
            upstream_frames: default_upstream_frames(),
            upstream_control: default_upstream_control(),
            downstream_frames: default_downstream_frames(),
            downstream_control: default_downstream_control(),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            poll_interval_ms: default_poll_interval_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            max_messages_per_poll: default_max_messages_per_poll(),
            camera_filter: Vec::new(),
        }
    }
}

impl HubSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl HubConfig {
    /// The four endpoints in open order.  The camera filter becomes the
    /// upstream subscriber's topic list.
    pub fn endpoints(&self) -> Vec<EndpointConfig> {
        let mut upstream_frames = self.upstream_frames.clone();
        if !self.hub.camera_filter.is_empty() {
            upstream_frames.topics = self.hub.camera_filter.clone();
        }
        vec![
            upstream_frames,
            self.downstream_frames.clone(),
            self.downstream_control.clone(),
            self.upstream_control.clone(),
        ]
    }

    /// Checks endpoint roles and names.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let expected = [
            (&self.upstream_frames, SocketRole::Subscriber),
            (&self.downstream_frames, SocketRole::Publisher),
            (&self.downstream_control, SocketRole::Subscriber),
            (&self.upstream_control, SocketRole::Publisher),
        ];
        let mut names = HashSet::new();
        for (endpoint, role) in expected {
            if endpoint.role != role {
                return Err(ConfigError::Invalid(format!(
                    "endpoint `{}` must be a {role}, not a {}",
                    endpoint.name, endpoint.role
                )));
            }
            if !endpoint.enabled {
                return Err(ConfigError::Invalid(format!(
                    "endpoint `{}` cannot be disabled on the hub",
                    endpoint.name
                )));
            }
            if !names.insert(endpoint.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate endpoint name `{}`",
                    endpoint.name
                )));
            }
        }
        if self.hub.camera_filter.iter().any(String::is_empty) {
            return Err(ConfigError::Invalid(
                "camera_filter entries must not be empty".to_string(),
            ));
        }
        self.reconnect.validate()
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Default location of `hub.toml`.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the platform config
/// directory cannot be determined.
pub fn hub_config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("hub.toml"))
}

/// Loads `HubConfig` from `path`, or the defaults if the file is missing.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_hub_config_from(path: &Path) -> Result<HubConfig, ConfigError> {
    load_or_default(path)
}

/// Writes `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] or [`ConfigError::Serialize`].
pub fn save_hub_config_to(config: &HubConfig, path: &Path) -> Result<(), ConfigError> {
    save(config, path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
