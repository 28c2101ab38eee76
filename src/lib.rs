pub mod capture;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod utils;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use capture::frame::PixelFormat;
use capture::{ConnectionParameters, RtspPathResolver};
use engine::{EngineOptions, ReconnectPolicy};
use error::ConfigError;
use serde::{Deserialize, Serialize};

pub use capture::{Frame, ResolvedEndpoint};
pub use engine::{CameraEngine, EngineState, StartOutcome};
pub use pipeline::LatencyStats;

/// Environment variable prefix, e.g. `CAMWATCH_CAMERA__HOST`
pub const ENV_PREFIX: &str = "CAMWATCH";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub capture: CaptureConfig,
    pub reconnect: ReconnectConfig,
    pub metrics: MetricsConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub rtsp_port: u16,
    pub rtsp_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub open_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub buffer_depth: u32, // Frames queued ahead of the reader
    pub latency_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    pub rediscover_after: u32, // 0 = never
    pub stop_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub report_interval_secs: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 80,
            username: String::new(),
            password: String::new(),
            rtsp_port: 554,
            rtsp_path: "/".into(),
        }
    }
}

impl fmt::Debug for CameraConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("rtsp_port", &self.rtsp_port)
            .field("rtsp_path", &self.rtsp_path)
            .finish()
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: capture::resolver::DEFAULT_WIDTH,
            height: capture::resolver::DEFAULT_HEIGHT,
            format: PixelFormat::Bgr24,
            open_timeout_ms: 2000,
            read_timeout_ms: 2000,
            buffer_depth: 1,
            latency_window: pipeline::ringbuf::DEFAULT_LATENCY_WINDOW,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 100, // fixed pause unless raised
            multiplier: 2.0,
            rediscover_after: 0,
            stop_timeout_ms: 1000,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 10,
        }
    }
}

/// Upper bound on `reconnect.multiplier`
pub const MAX_BACKOFF_MULTIPLIER: f64 = 100.0;

impl Config {
    /// Load from an optional TOML file, then `CAMWATCH_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.camera.host.trim().is_empty() {
            return invalid("camera.host must be set");
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return invalid("capture.width and capture.height must be positive");
        }
        if self.capture.latency_window == 0 {
            return invalid("capture.latency_window must be positive");
        }
        if self.capture.open_timeout_ms == 0 || self.capture.read_timeout_ms == 0 {
            return invalid("capture timeouts must be positive");
        }
        if self.reconnect.initial_backoff_ms == 0 {
            return invalid("reconnect.initial_backoff_ms must be positive");
        }
        // Also rejects NaN and infinity
        if !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&self.reconnect.multiplier) {
            return invalid("reconnect.multiplier must be between 1.0 and 100.0");
        }
        Ok(())
    }

    pub fn connection_parameters(&self) -> ConnectionParameters {
        ConnectionParameters::new(
            self.camera.host.clone(),
            self.camera.port,
            self.camera.username.clone(),
            self.camera.password.clone(),
        )
        .with_resolution(self.capture.width, self.capture.height)
    }

    pub fn resolver(&self) -> RtspPathResolver {
        RtspPathResolver::new(self.camera.rtsp_port, self.camera.rtsp_path.clone())
    }

    pub fn engine_options(&self) -> EngineOptions {
        let reconnect = ReconnectPolicy::exponential(
            Duration::from_millis(self.reconnect.initial_backoff_ms),
            Duration::from_millis(self.reconnect.max_backoff_ms),
            self.reconnect.multiplier,
        )
        .with_rediscovery(self.reconnect.rediscover_after);

        EngineOptions {
            format: self.capture.format,
            open_timeout: Duration::from_millis(self.capture.open_timeout_ms),
            read_timeout: Duration::from_millis(self.capture.read_timeout_ms),
            buffer_depth: self.capture.buffer_depth,
            latency_window: self.capture.latency_window,
            reconnect,
            stop_timeout: Duration::from_millis(self.reconnect.stop_timeout_ms),
        }
    }
}
