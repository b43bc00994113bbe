//! Configuration
//!
//! Defaults match the values the session core is tuned for. Every section can
//! be overridden from the environment or loaded from a JSON file; durations
//! are expressed in milliseconds on the wire.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration [{field}]: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionCoreConfig {
    pub connection: ConnectionConfig,
    pub ice: IceConfig,
    pub recording: RecordingConfig,
}

impl SessionCoreConfig {
    /// Defaults with environment overrides applied to every section
    pub fn from_env() -> Self {
        Self {
            connection: ConnectionConfig::from_env(),
            ice: IceConfig::from_env(),
            recording: RecordingConfig::from_env(),
        }
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()?;
        self.ice.validate()?;
        self.recording.validate()
    }
}

/// Connection lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Whether a dropped link is retried at all
    pub reconnect_enabled: bool,

    /// Attempts before the manager gives up and reports failure
    pub max_reconnect_attempts: u32,

    /// Delay before the first reconnection attempt
    #[serde(with = "crate::utils::duration_ms", rename = "reconnectBaseDelayMs")]
    pub reconnect_base_delay: Duration,

    /// Growth factor applied per attempt
    pub reconnect_multiplier: f64,

    /// Upper bound for any single backoff delay
    #[serde(with = "crate::utils::duration_ms", rename = "reconnectMaxDelayMs")]
    pub reconnect_max_delay: Duration,

    /// Liveness poll period
    #[serde(with = "crate::utils::duration_ms", rename = "healthCheckIntervalMs")]
    pub health_check_interval: Duration,

    /// Quality sampling period
    #[serde(with = "crate::utils::duration_ms", rename = "qualityIntervalMs")]
    pub quality_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_enabled: true,
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(1000),
            reconnect_multiplier: 2.0,
            reconnect_max_delay: Duration::from_millis(30_000),
            health_check_interval: Duration::from_secs(5),
            quality_interval: Duration::from_secs(5),
        }
    }
}

impl ConnectionConfig {
    /// Defaults with `SESSION_*` environment overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_parse::<bool>("SESSION_RECONNECT_ENABLED") {
            config.reconnect_enabled = val;
        }
        if let Some(val) = env_parse("SESSION_MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = val;
        }
        if let Some(val) = env_parse("SESSION_RECONNECT_BASE_MS") {
            config.reconnect_base_delay = Duration::from_millis(val);
        }
        if let Some(val) = env_parse("SESSION_RECONNECT_MULTIPLIER") {
            config.reconnect_multiplier = val;
        }
        if let Some(val) = env_parse("SESSION_RECONNECT_MAX_MS") {
            config.reconnect_max_delay = Duration::from_millis(val);
        }
        if let Some(val) = env_parse("SESSION_HEALTH_CHECK_MS") {
            config.health_check_interval = Duration::from_millis(val);
        }
        if let Some(val) = env_parse("SESSION_QUALITY_INTERVAL_MS") {
            config.quality_interval = Duration::from_millis(val);
        }

        config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconnect_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "reconnectMultiplier",
                "must be >= 1.0",
            ));
        }
        if self.reconnect_max_delay < self.reconnect_base_delay {
            return Err(ConfigError::invalid(
                "reconnectMaxDelayMs",
                "must not be below the base delay",
            ));
        }
        if self.health_check_interval.is_zero() {
            return Err(ConfigError::invalid("healthCheckIntervalMs", "must be > 0"));
        }
        if self.quality_interval.is_zero() {
            return Err(ConfigError::invalid("qualityIntervalMs", "must be > 0"));
        }
        Ok(())
    }
}

/// ICE server provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IceConfig {
    /// Endpoint returning `{ iceServers: [...] }`
    pub endpoint: String,

    /// Period of the background refresh timer
    #[serde(with = "crate::utils::duration_ms", rename = "refreshIntervalMs")]
    pub refresh_interval: Duration,

    /// Per-request timeout for the endpoint
    #[serde(with = "crate::utils::duration_ms", rename = "fetchTimeoutMs")]
    pub fetch_timeout: Duration,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/api/webrtc/ice-servers".to_string(),
            refresh_interval: Duration::from_secs(30 * 60),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

impl IceConfig {
    /// Defaults with `ICE_*` environment overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(endpoint) = std::env::var("ICE_SERVERS_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(val) = env_parse("ICE_REFRESH_INTERVAL_MS") {
            config.refresh_interval = Duration::from_millis(val);
        }
        if let Some(val) = env_parse("ICE_FETCH_TIMEOUT_MS") {
            config.fetch_timeout = Duration::from_millis(val);
        }

        config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(ConfigError::invalid("endpoint", "must be an http(s) URL"));
        }
        if self.refresh_interval.is_zero() {
            return Err(ConfigError::invalid("refreshIntervalMs", "must be > 0"));
        }
        Ok(())
    }
}

/// Recording engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecordingConfig {
    /// Directory of the durable chunk store
    pub storage_dir: PathBuf,

    /// Bytes the store may occupy
    pub storage_quota_bytes: u64,

    /// Minimum free space required to start a recording
    pub storage_safety_margin_bytes: u64,

    /// Preferred container/codec
    pub mime_type: String,

    pub video_bits_per_second: u32,

    pub audio_bits_per_second: u32,

    /// Capture timeslice
    #[serde(with = "crate::utils::duration_ms", rename = "chunkIntervalMs")]
    pub chunk_interval: Duration,

    /// Soft limit; larger chunks are flagged but still stored
    pub max_chunk_size_bytes: u64,

    /// How long `stop_recording` waits for the device to finish
    #[serde(with = "crate::utils::duration_ms", rename = "stopTimeoutMs")]
    pub stop_timeout: Duration,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("recordings"),
            storage_quota_bytes: 2 * 1024 * 1024 * 1024,
            storage_safety_margin_bytes: 50 * 1024 * 1024,
            mime_type: "video/webm;codecs=vp8,opus".to_string(),
            video_bits_per_second: 2_500_000,
            audio_bits_per_second: 128_000,
            chunk_interval: Duration::from_millis(1000),
            max_chunk_size_bytes: 10 * 1024 * 1024,
            stop_timeout: Duration::from_secs(5),
        }
    }
}

impl RecordingConfig {
    /// Defaults with `RECORDING_*` environment overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("RECORDING_STORAGE_DIR") {
            config.storage_dir = PathBuf::from(dir);
        }
        if let Some(val) = env_parse("RECORDING_STORAGE_QUOTA_BYTES") {
            config.storage_quota_bytes = val;
        }
        if let Ok(mime) = std::env::var("RECORDING_MIME_TYPE") {
            config.mime_type = mime;
        }
        if let Some(val) = env_parse("RECORDING_CHUNK_INTERVAL_MS") {
            config.chunk_interval = Duration::from_millis(val);
        }
        if let Some(val) = env_parse("RECORDING_VIDEO_BPS") {
            config.video_bits_per_second = val;
        }
        if let Some(val) = env_parse("RECORDING_AUDIO_BPS") {
            config.audio_bits_per_second = val;
        }

        config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_interval.is_zero() {
            return Err(ConfigError::invalid("chunkIntervalMs", "must be > 0"));
        }
        if self.mime_type.trim().is_empty() {
            return Err(ConfigError::invalid("mimeType", "must not be empty"));
        }
        if self.max_chunk_size_bytes == 0 {
            return Err(ConfigError::invalid("maxChunkSizeBytes", "must be > 0"));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(val) => Some(val),
        Err(_) => {
            tracing::warn!("Ignoring unparsable value for {}: {:?}", key, raw);
            None
        }
    }
}
