//! Configuration management for the farmgate ingest pipeline.
//!
//! Configuration is loaded from layered sources: a default config file,
//! an environment-specific file, and `FARMGATE_`-prefixed environment
//! variables, with later sources overriding earlier ones.

use crate::decoder::ChannelOrder;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the ingest pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct FarmgateConfig {
    /// Frame source configuration
    pub source: SourceConfig,

    /// Decode/normalize configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Remote store configuration
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which frame source the pipeline reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Read `{base}{index}.jpg` files from the filesystem
    File,
    /// Accept length-prefixed frame records over TCP
    Stream,
}

/// Frame source configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Active source mode
    pub mode: SourceMode,

    /// File source settings (used when mode = "file")
    #[serde(default)]
    pub file: FileSourceConfig,

    /// Stream source settings (used when mode = "stream")
    #[serde(default)]
    pub stream: StreamSourceConfig,
}

/// File-based source: reads `{base_path}{index}.jpg` for a bounded range.
#[derive(Debug, Clone, Deserialize)]
pub struct FileSourceConfig {
    /// Path prefix; the frame index and ".jpg" are appended
    #[serde(default)]
    pub base_path: String,

    /// Logical source tag used in store keys
    #[serde(default = "default_source_tag")]
    pub source_tag: String,

    /// First frame index (inclusive)
    #[serde(default = "default_start_index")]
    pub start_index: u64,

    /// Last frame index (inclusive)
    #[serde(default = "default_end_index")]
    pub end_index: u64,

    /// Delay between frames in milliseconds (0 = none)
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

/// Streamed source: one TCP peer sending length-prefixed frame records.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamSourceConfig {
    /// Address to bind the listener to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted wire record size in bytes
    #[serde(default = "default_max_record_bytes")]
    pub max_record_bytes: usize,

    /// Base delay between accept retries in milliseconds
    #[serde(default = "default_accept_base_delay_ms")]
    pub accept_base_delay_ms: u64,

    /// Maximum delay between accept retries in milliseconds
    #[serde(default = "default_accept_max_delay_ms")]
    pub accept_max_delay_ms: u64,
}

/// Decode/normalize configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    /// Target width for normalized frames
    #[serde(default = "default_target_width")]
    pub target_width: u32,

    /// Target height for normalized frames
    #[serde(default = "default_target_height")]
    pub target_height: u32,

    /// Channel order of the normalized output
    #[serde(default)]
    pub channel_order: ChannelOrder,
}

/// Remote store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Pool (named store partition) addressed by puts
    #[serde(default = "default_pool")]
    pub pool: String,

    /// Namespace prefix for store keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Subgroup/shard index passed to puts
    #[serde(default)]
    pub subgroup_index: u32,

    /// Version hint passed to puts (0 = unconditional)
    #[serde(default)]
    pub version_hint: u64,

    /// Whether puts are flagged as triggers
    #[serde(default)]
    pub is_trigger: bool,

    /// Append the capture timestamp to store keys
    #[serde(default)]
    pub timestamped_keys: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_source_tag() -> String {
    "cam0".to_string()
}
fn default_start_index() -> u64 {
    1
}
fn default_end_index() -> u64 {
    1
}
fn default_frame_interval_ms() -> u64 {
    0
}
fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_record_bytes() -> usize {
    16 * 1024 * 1024
}
fn default_accept_base_delay_ms() -> u64 {
    500
}
fn default_accept_max_delay_ms() -> u64 {
    10_000
}
fn default_target_width() -> u32 {
    352
}
fn default_target_height() -> u32 {
    240
}
fn default_pool() -> String {
    "frames".to_string()
}
fn default_key_prefix() -> String {
    "/farm".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for FileSourceConfig {
    fn default() -> Self {
        Self {
            base_path: String::new(),
            source_tag: default_source_tag(),
            start_index: default_start_index(),
            end_index: default_end_index(),
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

impl Default for StreamSourceConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            max_record_bytes: default_max_record_bytes(),
            accept_base_delay_ms: default_accept_base_delay_ms(),
            accept_max_delay_ms: default_accept_max_delay_ms(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            target_width: default_target_width(),
            target_height: default_target_height(),
            channel_order: ChannelOrder::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl FarmgateConfig {
    /// Load configuration from files and environment variables.
    ///
    /// Sources, later overriding earlier:
    /// 1. config/default.toml
    /// 2. config/{RUN_MODE}.toml
    /// 3. Environment variables prefixed with FARMGATE_ (e.g. FARMGATE_STORE__POOL)
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::with_prefix("FARMGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Create configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("FARMGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.processing.target_width == 0 || self.processing.target_height == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "processing.target_width/height".to_string(),
                message: "Dimensions must be greater than 0".to_string(),
            });
        }

        if self.store.pool.is_empty() {
            return Err(ConfigValidationError::MissingField("store.pool".to_string()));
        }

        if self.store.key_prefix.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "store.key_prefix".to_string(),
            ));
        }

        match self.source.mode {
            SourceMode::File => {
                if self.source.file.base_path.is_empty() {
                    return Err(ConfigValidationError::MissingField(
                        "source.file.base_path".to_string(),
                    ));
                }
                if self.source.file.start_index > self.source.file.end_index {
                    return Err(ConfigValidationError::InvalidValue {
                        field: "source.file.start_index".to_string(),
                        message: "start_index must not exceed end_index".to_string(),
                    });
                }
            }
            SourceMode::Stream => {
                if self.source.stream.port == 0 {
                    return Err(ConfigValidationError::InvalidValue {
                        field: "source.stream.port".to_string(),
                        message: "Port must be greater than 0".to_string(),
                    });
                }
                if self.source.stream.max_record_bytes == 0 {
                    return Err(ConfigValidationError::InvalidValue {
                        field: "source.stream.max_record_bytes".to_string(),
                        message: "Record size limit must be greater than 0".to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

impl FileSourceConfig {
    /// Delay between frames as a Duration, if configured.
    pub fn frame_interval(&self) -> Option<Duration> {
        (self.frame_interval_ms > 0).then(|| Duration::from_millis(self.frame_interval_ms))
    }
}

impl StreamSourceConfig {
    /// Base accept retry delay as a Duration.
    pub fn accept_base_delay(&self) -> Duration {
        Duration::from_millis(self.accept_base_delay_ms)
    }

    /// Maximum accept retry delay as a Duration.
    pub fn accept_max_delay(&self) -> Duration {
        Duration::from_millis(self.accept_max_delay_ms)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
