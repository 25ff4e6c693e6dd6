//! Configuration management for the stereo MJPEG streamer

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete streamer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub page: PageConfig,

    #[serde(default)]
    pub camera: CamerasConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Close a stream when no frame arrives (or a write stalls) for this long.
    /// 0 keeps connections waiting indefinitely.
    #[serde(default)]
    pub stream_timeout_ms: u64,

    /// Interval for the per-camera statistics log line (seconds, 0 = off)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            port: default_port(),
            stream_timeout_ms: 0,
            stats_interval_seconds: default_stats_interval(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_ip, self.port)
    }

    pub fn stream_timeout(&self) -> Option<Duration> {
        (self.stream_timeout_ms > 0).then(|| Duration::from_millis(self.stream_timeout_ms))
    }
}

/// Stream locations used by the single-camera page, where each eye is served
/// by its own Pi.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageConfig {
    #[serde(default = "default_left_url")]
    pub left_url: String,

    #[serde(default = "default_right_url")]
    pub right_url: String,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            left_url: default_left_url(),
            right_url: default_right_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CamerasConfig {
    #[serde(default = "CameraConfig::default_left")]
    pub left: CameraConfig,

    #[serde(default = "CameraConfig::default_right")]
    pub right: CameraConfig,
}

impl Default for CamerasConfig {
    fn default() -> Self {
        Self {
            left: CameraConfig::default_left(),
            right: CameraConfig::default_right(),
        }
    }
}

/// Where a camera's frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Real sensor through GStreamer (`libcamerasrc` on a Pi)
    Libcamera,
    /// Synthetic moving gradient, no hardware needed
    TestPattern,
}

/// Per-camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_source")]
    pub source: SourceKind,

    /// Camera device
    /// - Raspberry Pi: libcamera camera name, e.g. "/base/axi/pcie@1000120000/rp1/i2c@88000/imx219@10"
    /// - Linux: "/dev/video0"
    /// - macOS: "0" for first webcam
    ///
    /// Unset picks the platform default for this camera's index.
    #[serde(default)]
    pub device: Option<String>,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_fps")]
    pub fps: u32,

    /// JPEG quality (1-100)
    #[serde(default = "default_quality")]
    pub quality: u32,

    /// "vertical-flip", "horizontal-flip", "rotate-180", "rotate-90" or "rotate-270"
    #[serde(default)]
    pub flip_method: Option<String>,
}

impl CameraConfig {
    fn default_left() -> Self {
        Self {
            enabled: true,
            source: default_source(),
            device: None,
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            quality: default_quality(),
            flip_method: None,
        }
    }

    fn default_right() -> Self {
        Self::default_left()
    }
}

// Default value functions
fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_stats_interval() -> u64 {
    30
}
fn default_left_url() -> String {
    "http://leftcam.local:8000/stream.mjpg".to_string()
}
fn default_right_url() -> String {
    "http://rightcam.local:8000/stream.mjpg".to_string()
}
fn default_enabled() -> bool {
    true
}
fn default_source() -> SourceKind {
    SourceKind::Libcamera
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_fps() -> u32 {
    30
}
fn default_quality() -> u32 {
    85
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Loads configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        std::fs::read_to_string(path)?.parse()
    }

    /// Validates configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be > 0".to_string()));
        }

        if self.camera.left.enabled {
            validate_camera(&self.camera.left, "camera.left")?;
        }

        if self.camera.right.enabled {
            validate_camera(&self.camera.right, "camera.right")?;
        }

        Ok(())
    }
}

/// Largest frame side a baseline JPEG header can describe
pub const MAX_DIMENSION: u32 = u16::MAX as u32;

fn validate_camera(cam: &CameraConfig, name: &str) -> Result<(), ConfigError> {
    if cam.width == 0 || cam.height == 0 {
        return Err(ConfigError::Invalid(format!(
            "{}: width and height must be > 0",
            name
        )));
    }

    if cam.width > MAX_DIMENSION || cam.height > MAX_DIMENSION {
        return Err(ConfigError::Invalid(format!(
            "{}: width and height must be at most {}, got {}x{}",
            name, MAX_DIMENSION, cam.width, cam.height
        )));
    }

    // JPEG MCUs are 8x8
    if cam.width % 8 != 0 || cam.height % 8 != 0 {
        return Err(ConfigError::Invalid(format!(
            "{}: width and height must be multiples of 8",
            name
        )));
    }

    if cam.fps == 0 || cam.fps > 120 {
        return Err(ConfigError::Invalid(format!(
            "{}: FPS must be between 1 and 120, got {}",
            name, cam.fps
        )));
    }

    if cam.quality == 0 || cam.quality > 100 {
        return Err(ConfigError::Invalid(format!(
            "{}: quality must be between 1 and 100, got {}",
            name, cam.quality
        )));
    }

    Ok(())
}
