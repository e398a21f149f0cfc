//! Global configuration parsing and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Worker loop tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Step budget per session before the run is reported as exhausted.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Oracle confidence (0-10) below which a warning is logged.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: u8,
    /// Upper bound on how long a paused worker sleeps between flag checks.
    #[serde(default = "default_pause_poll_ms")]
    pub pause_poll_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            min_confidence: default_min_confidence(),
            pause_poll_ms: default_pause_poll_ms(),
        }
    }
}

impl WorkerConfig {
    /// Pause poll interval as a [`Duration`].
    #[must_use]
    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }
}

fn default_max_steps() -> u32 {
    40
}

fn default_min_confidence() -> u8 {
    7
}

fn default_pause_poll_ms() -> u64 {
    250
}

/// Live frame streaming settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StreamConfig {
    /// Desired frames per second delivered to viewers.
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Fastest rate the capture source can produce frames at.
    #[serde(default = "default_max_capture_fps")]
    pub max_capture_fps: u32,
    /// Frames buffered per viewer before further frames are dropped for it.
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,
    /// JPEG quality hint passed to the capture source.
    #[serde(default = "default_quality")]
    pub quality: u8,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            max_capture_fps: default_max_capture_fps(),
            sink_capacity: default_sink_capacity(),
            quality: default_quality(),
        }
    }
}

impl StreamConfig {
    /// Emit one frame out of every `n` captures.
    #[must_use]
    pub fn every_nth_capture(&self) -> u32 {
        (self.max_capture_fps / self.fps.max(1)).max(1)
    }

    /// Interval between successive capture requests.
    #[must_use]
    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.max_capture_fps.max(1)))
    }
}

fn default_fps() -> u32 {
    20
}

fn default_max_capture_fps() -> u32 {
    30
}

fn default_sink_capacity() -> usize {
    2
}

fn default_quality() -> u8 {
    85
}

/// Loop detection window.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LoopGuardConfig {
    /// Number of recent fingerprints retained.
    #[serde(default = "default_guard_capacity")]
    pub capacity: usize,
    /// Repeats of one fingerprint within the window that count as stuck.
    #[serde(default = "default_guard_threshold")]
    pub threshold: usize,
}

impl Default for LoopGuardConfig {
    fn default() -> Self {
        Self {
            capacity: default_guard_capacity(),
            threshold: default_guard_threshold(),
        }
    }
}

fn default_guard_capacity() -> usize {
    5
}

fn default_guard_threshold() -> usize {
    3
}

/// Worker-to-network event bridge settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// How long `deliver` waits for transmission confirmation.
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
    /// Outbound queue depth per attached control connection.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: default_delivery_timeout_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl BridgeConfig {
    /// Delivery confirmation timeout as a [`Duration`].
    #[must_use]
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

fn default_delivery_timeout_ms() -> u64 {
    1000
}

fn default_queue_capacity() -> usize {
    256
}

/// Websocket channel keepalive settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ControlConfig {
    /// Idle seconds before the server sends a keepalive ping.
    #[serde(default = "default_keepalive_seconds")]
    pub keepalive_seconds: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            keepalive_seconds: default_keepalive_seconds(),
        }
    }
}

fn default_keepalive_seconds() -> u64 {
    30
}

/// HTTP decision oracle sidecar.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OracleConfig {
    /// URL receiving `POST` decision requests.
    pub endpoint: String,
    /// Per-request timeout.
    #[serde(default = "default_oracle_timeout")]
    pub timeout_seconds: u64,
}

fn default_oracle_timeout() -> u64 {
    60
}

/// HTTP browser automation sidecar.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BrowserConfig {
    /// Base URL of the automation service.
    pub endpoint: String,
    /// Per-request timeout.
    #[serde(default = "default_browser_timeout")]
    pub timeout_seconds: u64,
}

fn default_browser_timeout() -> u64 {
    30
}

fn default_http_host() -> String {
    "127.0.0.1".into()
}

fn default_http_port() -> u16 {
    8000
}

fn default_ipc_name() -> String {
    "pilot-deck".into()
}

fn default_max_concurrent_sessions() -> u32 {
    4
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Interface the HTTP/websocket server binds to.
    #[serde(default = "default_http_host")]
    pub http_host: String,
    /// Port for the HTTP/websocket server.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Named pipe / Unix socket identifier for `pilot-deck-ctl`.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Maximum concurrently running sessions.
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: u32,
    /// Worker loop tuning.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Frame streaming settings.
    #[serde(default)]
    pub stream: StreamConfig,
    /// Loop detection window.
    #[serde(default)]
    pub loop_guard: LoopGuardConfig,
    /// Event bridge settings.
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// Websocket keepalive settings.
    #[serde(default)]
    pub control: ControlConfig,
    /// Decision oracle sidecar, if any.
    #[serde(default)]
    pub oracle: Option<OracleConfig>,
    /// Browser automation sidecar, if any.
    #[serde(default)]
    pub browser: Option<BrowserConfig>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: default_http_port(),
            ipc_name: default_ipc_name(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
            worker: WorkerConfig::default(),
            stream: StreamConfig::default(),
            loop_guard: LoopGuardConfig::default(),
            bridge: BridgeConfig::default(),
            control: ControlConfig::default(),
            oracle: None,
            browser: None,
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_sessions == 0 {
            return Err(AppError::Config(
                "max_concurrent_sessions must be greater than zero".into(),
            ));
        }

        if self.worker.max_steps == 0 {
            return Err(AppError::Config(
                "worker.max_steps must be greater than zero".into(),
            ));
        }

        if self.worker.min_confidence > 10 {
            return Err(AppError::Config(
                "worker.min_confidence must be between 0 and 10".into(),
            ));
        }

        if self.stream.fps == 0 {
            return Err(AppError::Config("stream.fps must be at least 1".into()));
        }

        if self.stream.max_capture_fps < self.stream.fps {
            return Err(AppError::Config(
                "stream.max_capture_fps must not be lower than stream.fps".into(),
            ));
        }

        if self.stream.sink_capacity == 0 {
            return Err(AppError::Config(
                "stream.sink_capacity must be at least 1".into(),
            ));
        }

        if self.loop_guard.threshold < 2 {
            return Err(AppError::Config(
                "loop_guard.threshold must be at least 2".into(),
            ));
        }

        if self.loop_guard.capacity < self.loop_guard.threshold {
            return Err(AppError::Config(
                "loop_guard.capacity must be at least loop_guard.threshold".into(),
            ));
        }

        if self.bridge.queue_capacity == 0 {
            return Err(AppError::Config(
                "bridge.queue_capacity must be at least 1".into(),
            ));
        }

        Ok(())
    }
}
