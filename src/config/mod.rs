//! Configuration module for the robot logger
//!
//! A session is described by one TOML file:
//!
//! ```toml
//! sampling_period_s = 0.01
//! text_logging_subnames = ["walking", "balancing"]
//! code_status_cmd_prefixes = ["cd ~/robotology-superbuild &&"]
//!
//! [telemetry]
//! save_period_s = 600.0
//! file_prefix = "robot_logger_device"
//!
//! [[cameras]]
//! name = "head"
//! kind = "rgbd"
//! fps = 30.0
//! rgb_save_mode = "video"
//! depth_save_mode = "frame"
//!
//! [[exogenous]]
//! kind = "vectors_collection"
//! remote = "/balancing-controller/logger"
//! signal_name = "balancing"
//! ```
//!
//! Every field except `telemetry.save_period_s` has a default.
//! [`LoggerConfig::validate`] checks every invariant before a session is
//! configured.
//!
//! # Config Location
//!
//! Without `--config`, the binary looks for `robolog.toml` in the
//! platform configuration directory under [`APP_ID`].

use crate::error::{LoggerError, Result};
use crate::publisher::MissingValuePolicy;
use crate::sources::{BindingSpec, ExogenousKind};
use crate::storage::{BufferConfig, MIN_CAPACITY_MARGIN};
use crate::types::{ImageKind, SaveMode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "robolog-rs";

/// Default config filename
pub const CONFIG_FILE: &str = "robolog.toml";

/// Environment variable naming the robot
pub const ROBOT_NAME_ENV: &str = "ROBOT_NAME";

/// Default acquisition period in seconds
pub const DEFAULT_SAMPLING_PERIOD_S: f64 = 0.01;

// ==================== Config Location ====================

/// Default config file path in the platform configuration directory
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

// ==================== Telemetry ====================

/// Buffering and rotation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    /// Rotation period in seconds (required)
    pub save_period_s: f64,

    /// Artifact name prefix
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// chrono format appended to the prefix
    #[serde(default = "default_file_indexing")]
    pub file_indexing: String,

    /// Directory receiving artifacts
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Queue headroom relative to one rotation period
    #[serde(default = "default_capacity_margin")]
    pub capacity_margin: f64,
}

fn default_file_prefix() -> String {
    "robot_logger_device".to_string()
}

fn default_file_indexing() -> String {
    "%Y_%m_%d_%H_%M_%S".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_capacity_margin() -> f64 {
    MIN_CAPACITY_MARGIN
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            save_period_s: 600.0,
            file_prefix: default_file_prefix(),
            file_indexing: default_file_indexing(),
            output_dir: default_output_dir(),
            capacity_margin: default_capacity_margin(),
        }
    }
}

// ==================== Discovery ====================

/// Periods of the discovery workers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Text-log producer scan period in seconds
    pub log_period_s: f64,
    /// Exogenous binding scan period in seconds
    pub exogenous_period_s: f64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            log_period_s: 2.0,
            exogenous_period_s: 1.0,
        }
    }
}

// ==================== Publisher ====================

/// Real-time publisher settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublisherConfig {
    pub enabled: bool,
    pub missing_value_policy: MissingValuePolicy,
    /// Bounded queue length per subscriber
    pub subscriber_queue: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            missing_value_policy: MissingValuePolicy::Omit,
            subscriber_queue: 64,
        }
    }
}

// ==================== Cameras ====================

/// Image streams a camera provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CameraKind {
    #[default]
    Rgb,
    Rgbd,
}

/// One configured camera
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CameraConfig {
    pub name: String,

    #[serde(default)]
    pub kind: CameraKind,

    /// Target frame rate of the camera worker
    pub fps: f64,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default)]
    pub rgb_save_mode: SaveMode,

    #[serde(default)]
    pub depth_save_mode: SaveMode,

    /// Factor applied to every depth value
    #[serde(default = "default_depth_scale")]
    pub depth_scale: f32,
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_depth_scale() -> f32 {
    1.0
}

impl CameraConfig {
    pub fn rgb(name: impl Into<String>, fps: f64) -> Self {
        Self {
            name: name.into(),
            kind: CameraKind::Rgb,
            fps,
            width: default_width(),
            height: default_height(),
            rgb_save_mode: SaveMode::Video,
            depth_save_mode: SaveMode::Video,
            depth_scale: default_depth_scale(),
        }
    }

    pub fn rgbd(name: impl Into<String>, fps: f64) -> Self {
        Self {
            kind: CameraKind::Rgbd,
            ..Self::rgb(name, fps)
        }
    }

    /// Streams of this camera with their save modes
    pub fn streams(&self) -> Vec<(ImageKind, SaveMode)> {
        match self.kind {
            CameraKind::Rgb => vec![(ImageKind::Rgb, self.rgb_save_mode)],
            CameraKind::Rgbd => vec![
                (ImageKind::Rgb, self.rgb_save_mode),
                (ImageKind::Depth, self.depth_save_mode),
            ],
        }
    }
}

// ==================== Exogenous Signals ====================

/// One configured exogenous signal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExogenousConfig {
    pub kind: ExogenousKind,
    /// Remote producer
    pub remote: String,
    /// Prefix of the created channels
    pub signal_name: String,
    /// Local port, derived from the signal name when absent
    #[serde(default)]
    pub local: Option<String>,
    #[serde(default = "default_carrier")]
    pub carrier: String,
}

fn default_carrier() -> String {
    "udp".to_string()
}

impl ExogenousConfig {
    pub fn binding_spec(&self) -> BindingSpec {
        BindingSpec {
            kind: self.kind,
            remote: self.remote.clone(),
            local: self
                .local
                .clone()
                .unwrap_or_else(|| format!("/robot-logger/exogenous_signals/{}:i", self.signal_name)),
            signal_name: self.signal_name.clone(),
            carrier: self.carrier.clone(),
        }
    }
}

// ==================== Pre-declared Channels ====================

/// Channel created at configure time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelConfig {
    pub name: String,
    pub size: usize,
    #[serde(default)]
    pub labels: Vec<String>,
}

// ==================== Logger Configuration ====================

/// Complete session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggerConfig {
    /// Acquisition period in seconds
    #[serde(default = "default_sampling_period")]
    pub sampling_period_s: f64,

    /// Only producers whose name contains one of these are connected
    #[serde(default)]
    pub text_logging_subnames: Vec<String>,

    /// Prefix identifying text-log producers
    #[serde(default = "default_port_prefix")]
    pub text_logging_port_prefix: String,

    /// Local port receiving text logs
    #[serde(default = "default_port_name")]
    pub text_logging_port_name: String,

    /// Shell prefixes run before the status commands of provenance records
    #[serde(default)]
    pub code_status_cmd_prefixes: Vec<String>,

    /// Robot name; `ROBOT_NAME` is used when absent
    #[serde(default)]
    pub robot_name: Option<String>,

    /// Robot description stored with every artifact
    #[serde(default)]
    pub description_list: Vec<String>,

    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub publisher: PublisherConfig,

    #[serde(default)]
    pub cameras: Vec<CameraConfig>,

    #[serde(default)]
    pub exogenous: Vec<ExogenousConfig>,

    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

fn default_sampling_period() -> f64 {
    DEFAULT_SAMPLING_PERIOD_S
}

fn default_port_prefix() -> String {
    "/log/".to_string()
}

fn default_port_name() -> String {
    "/robot-logger/log:i".to_string()
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            sampling_period_s: default_sampling_period(),
            text_logging_subnames: Vec::new(),
            text_logging_port_prefix: default_port_prefix(),
            text_logging_port_name: default_port_name(),
            code_status_cmd_prefixes: Vec::new(),
            robot_name: None,
            description_list: Vec::new(),
            telemetry: TelemetryConfig::default(),
            discovery: DiscoveryConfig::default(),
            publisher: PublisherConfig::default(),
            cameras: Vec::new(),
            exogenous: Vec::new(),
            channels: Vec::new(),
        }
    }
}

impl LoggerConfig {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoggerError::Configuration(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| LoggerError::Configuration(format!("Failed to serialize config: {}", e)))
    }

    /// Buffer store settings derived from this config
    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            sampling_period_s: self.sampling_period_s,
            save_period_s: self.telemetry.save_period_s,
            capacity_margin: self.telemetry.capacity_margin,
            file_prefix: self.telemetry.file_prefix.clone(),
            file_indexing: self.telemetry.file_indexing.clone(),
            output_dir: self.telemetry.output_dir.clone(),
        }
    }

    /// Robot name from the config, else from `ROBOT_NAME`, else empty
    pub fn resolved_robot_name(&self) -> String {
        self.robot_name
            .clone()
            .or_else(|| std::env::var(ROBOT_NAME_ENV).ok())
            .unwrap_or_default()
    }

    /// Check every invariant, failing on the first violation
    pub fn validate(&self) -> Result<()> {
        self.buffer_config().validate()?;

        if !(self.discovery.log_period_s > 0.0) || !(self.discovery.exogenous_period_s > 0.0) {
            return Err(LoggerError::Configuration(
                "discovery periods must be positive".to_string(),
            ));
        }
        if self.publisher.enabled && self.publisher.subscriber_queue == 0 {
            return Err(LoggerError::Configuration(
                "publisher.subscriber_queue must be at least 1".to_string(),
            ));
        }
        if self.text_logging_port_prefix.is_empty() {
            return Err(LoggerError::Configuration(
                "text_logging_port_prefix cannot be empty".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for camera in &self.cameras {
            if camera.name.is_empty() {
                return Err(LoggerError::Configuration("camera name cannot be empty".to_string()));
            }
            if !names.insert(camera.name.as_str()) {
                return Err(LoggerError::Configuration(format!(
                    "camera '{}' is configured twice",
                    camera.name
                )));
            }
            if !(camera.fps > 0.0) {
                return Err(LoggerError::Configuration(format!(
                    "camera '{}' fps must be positive",
                    camera.name
                )));
            }
            if camera.width == 0 || camera.height == 0 {
                return Err(LoggerError::Configuration(format!(
                    "camera '{}' dimensions must be positive",
                    camera.name
                )));
            }
            if !(camera.depth_scale > 0.0) {
                return Err(LoggerError::Configuration(format!(
                    "camera '{}' depth_scale must be positive",
                    camera.name
                )));
            }
        }

        let mut signals = HashSet::new();
        for signal in &self.exogenous {
            if signal.signal_name.is_empty() || signal.remote.is_empty() {
                return Err(LoggerError::Configuration(
                    "exogenous signals need a remote and a signal_name".to_string(),
                ));
            }
            if !signals.insert(signal.signal_name.as_str()) {
                return Err(LoggerError::Configuration(format!(
                    "exogenous signal '{}' is configured twice",
                    signal.signal_name
                )));
            }
        }

        for channel in &self.channels {
            if channel.name.is_empty() || channel.size == 0 {
                return Err(LoggerError::Configuration(format!(
                    "channel '{}' needs a name and a positive size",
                    channel.name
                )));
            }
            if !channel.labels.is_empty() && channel.labels.len() != channel.size {
                return Err(LoggerError::Configuration(format!(
                    "channel '{}' has {} labels for {} elements",
                    channel.name,
                    channel.labels.len(),
                    channel.size
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const FULL: &str = r#"
        sampling_period_s = 0.005
        text_logging_subnames = ["walking"]
        code_status_cmd_prefixes = ["cd /tmp &&"]
        description_list = ["neck_pitch", "neck_roll"]

        [telemetry]
        save_period_s = 120.0
        file_prefix = "ergocub"
        capacity_margin = 0.2

        [discovery]
        log_period_s = 5.0

        [publisher]
        missing_value_policy = "keep_last"

        [[cameras]]
        name = "head"
        kind = "rgbd"
        fps = 30.0
        depth_save_mode = "frame"
        depth_scale = 1000.0

        [[exogenous]]
        kind = "vectors_collection"
        remote = "/balancing/logger"
        signal_name = "balancing"

        [[channels]]
        name = "joints_state::positions"
        size = 2
        labels = ["neck_pitch", "neck_roll"]
    "#;

    #[test]
    fn test_parse_full_config() {
        let config = LoggerConfig::from_toml(FULL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.sampling_period_s, 0.005);
        assert_eq!(config.telemetry.file_prefix, "ergocub");
        assert_eq!(config.telemetry.file_indexing, "%Y_%m_%d_%H_%M_%S");
        assert_eq!(config.discovery.log_period_s, 5.0);
        assert_eq!(config.discovery.exogenous_period_s, 1.0);
        assert_eq!(config.publisher.missing_value_policy, MissingValuePolicy::KeepLast);
        assert_eq!(config.text_logging_port_prefix, "/log/");

        let camera = &config.cameras[0];
        assert_eq!(camera.kind, CameraKind::Rgbd);
        assert_eq!(camera.rgb_save_mode, SaveMode::Video);
        assert_eq!(
            camera.streams(),
            vec![(ImageKind::Rgb, SaveMode::Video), (ImageKind::Depth, SaveMode::Frame)]
        );

        let binding = config.exogenous[0].binding_spec();
        assert_eq!(binding.local, "/robot-logger/exogenous_signals/balancing:i");
        assert_eq!(binding.carrier, "udp");
    }

    #[test]
    fn test_missing_save_period_is_fatal() {
        let err = LoggerConfig::from_toml("[telemetry]\nfile_prefix = \"x\"\n").unwrap_err();
        assert!(err.is_fatal());
        let err = LoggerConfig::from_toml("sampling_period_s = 0.01\n").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = LoggerConfig::default();
        config.validate().unwrap();

        config.telemetry.save_period_s = 0.0;
        assert!(config.validate().is_err());

        let mut config = LoggerConfig::default();
        config.cameras.push(CameraConfig::rgb("head", 0.0));
        assert!(config.validate().is_err());

        let mut config = LoggerConfig::default();
        config.cameras.push(CameraConfig::rgb("head", 30.0));
        config.cameras.push(CameraConfig::rgbd("head", 30.0));
        assert!(config.validate().is_err());

        let mut config = LoggerConfig::default();
        config.channels.push(ChannelConfig {
            name: "ft".into(),
            size: 6,
            labels: vec!["f_x".into()],
        });
        assert!(config.validate().is_err());

        let mut config = LoggerConfig::default();
        config.telemetry.capacity_margin = 0.0;
        assert!(config.validate().is_err());

        let mut config = LoggerConfig::default();
        config.telemetry.file_indexing = "%Y_%Q".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_keeps_cameras() {
        let config = LoggerConfig::from_toml(FULL).unwrap();
        let text = config.to_toml().unwrap();
        let back = LoggerConfig::from_toml(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, FULL).unwrap();
        let config = LoggerConfig::load(&path).unwrap();
        assert_eq!(config.cameras.len(), 1);
        assert!(LoggerConfig::load(dir.path().join("missing.toml"))
            .unwrap_err()
            .is_fatal());
    }

    #[test]
    #[serial]
    fn test_robot_name_from_env() {
        let mut config = LoggerConfig::default();
        std::env::set_var(ROBOT_NAME_ENV, "ergoCubSN001");
        assert_eq!(config.resolved_robot_name(), "ergoCubSN001");
        config.robot_name = Some("iCubGenova09".into());
        assert_eq!(config.resolved_robot_name(), "iCubGenova09");
        std::env::remove_var(ROBOT_NAME_ENV);
        config.robot_name = None;
        assert_eq!(config.resolved_robot_name(), "");
    }
}
