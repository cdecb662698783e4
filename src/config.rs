//! Configuration loading from TOML
//!
//! # Configuration File Format
//!
//! ```toml
//! [application]
//! name = "seis-relay"
//! # Bounded queue between the upstream reader and the fan-out worker
//! import_queue_capacity = 1000
//!
//! [upstream]
//! address = "import.example.org:5560"
//! # Backoff after failed or ended attempts; any delivered packet resets it
//! reconnect_schedule_s = [0, 5, 15]
//! identifier = "seis-relay"
//! # auth_token = "..."
//!
//! [sanitizer]
//! max_expired_time_s = 300
//! max_future_time_s = 0
//! # Negative disables the batched rejection log lines
//! log_interval_s = 3600
//! # Exactly one of circular_buffer_size / circular_buffer_duration_s
//! circular_buffer_duration_s = 300
//!
//! [streams]
//! max_queue_size = 8
//!
//! [network]
//! bind_address = "0.0.0.0:5561"
//! ```
//!
//! See `seis-relay.toml` for a complete example.

use crate::error::{Error, Result};
use crate::relay::StreamOptions;
use crate::sanitizer::{
    DuplicateDetectorOptions, ExpiredDetectorOptions, FutureDetectorOptions,
};
use crate::upstream::UpstreamOptions;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Application-level settings
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationConfig {
    /// Application name, used for logging and as the default
    /// `OTEL_SERVICE_NAME`.
    pub name: String,

    /// Capacity of the bounded queue between the upstream reader and the
    /// fan-out worker.  When full, the oldest packet is evicted.
    ///
    /// **Default**: 1000
    #[serde(default = "default_import_queue_capacity")]
    pub import_queue_capacity: usize,
}

fn default_import_queue_capacity() -> usize {
    1000
}

/// Upstream import service connection
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Import service address, `host:port`.
    pub address: String,

    /// Reconnect backoff schedule in seconds, ascending.
    ///
    /// **Default**: `[0, 5, 15]`
    #[serde(default = "default_reconnect_schedule")]
    pub reconnect_schedule_s: Vec<u64>,

    /// Subscriber identifier forwarded to the import service.
    #[serde(default)]
    pub identifier: Option<String>,

    /// Bearer token forwarded in the subscription request.
    #[serde(default)]
    pub auth_token: Option<String>,
}

fn default_reconnect_schedule() -> Vec<u64> {
    vec![0, 5, 15]
}

/// Sanitizer pipeline settings
#[derive(Debug, Clone, Deserialize)]
pub struct SanitizerConfig {
    /// Oldest acceptable packet age in seconds.  Must be positive.
    ///
    /// **Default**: 300 (5 minutes)
    #[serde(default = "default_max_expired_time_s")]
    pub max_expired_time_s: u64,

    /// How far past the wall clock a packet's end time may reach, seconds.
    ///
    /// **Default**: 0 (still admits a zero-latency 1-sample packet)
    #[serde(default)]
    pub max_future_time_s: u64,

    /// Seconds between batched rejection log lines; negative disables them.
    ///
    /// **Default**: 3600
    #[serde(default = "default_log_interval_s")]
    pub log_interval_s: i64,

    /// Fixed per-channel duplicate-history capacity.  Mutually exclusive
    /// with `circular_buffer_duration_s`.
    #[serde(default)]
    pub circular_buffer_size: Option<usize>,

    /// Target duplicate-history retention window in seconds; per-channel
    /// capacity is derived from the channel's first packet.
    ///
    /// **Default**: 300 when `circular_buffer_size` is unset
    #[serde(default)]
    pub circular_buffer_duration_s: Option<u64>,
}

fn default_max_expired_time_s() -> u64 {
    300
}

fn default_log_interval_s() -> i64 {
    3600
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_expired_time_s: default_max_expired_time_s(),
            max_future_time_s: 0,
            log_interval_s: default_log_interval_s(),
            circular_buffer_size: None,
            circular_buffer_duration_s: None,
        }
    }
}

/// Per-stream fan-out settings
#[derive(Debug, Clone, Deserialize)]
pub struct StreamsConfig {
    /// Per-subscriber queue capacity.  Must be positive.
    ///
    /// **Default**: 8
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

fn default_max_queue_size() -> usize {
    8
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
        }
    }
}

/// Downstream server settings
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Bind address for the downstream subscriber server, `host:port`.
    pub bind_address: String,
}

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub application: ApplicationConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub sanitizer: SanitizerConfig,
    #[serde(default)]
    pub streams: StreamsConfig,
    pub network: NetworkConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = basic_toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        if config.application.name.trim().is_empty() {
            return Err(Error::Config("application.name must be set".to_string()));
        }
        if config.application.import_queue_capacity == 0 {
            return Err(Error::Config(
                "import_queue_capacity must be positive".to_string(),
            ));
        }
        if config.upstream.address.trim().is_empty() {
            return Err(Error::Config("upstream.address must be set".to_string()));
        }
        let schedule = &config.upstream.reconnect_schedule_s;
        if schedule.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(Error::Config(
                "reconnect_schedule_s must be sorted ascending".to_string(),
            ));
        }
        if config.sanitizer.max_expired_time_s == 0 {
            return Err(Error::Config(
                "max_expired_time_s must be positive".to_string(),
            ));
        }
        if config.sanitizer.circular_buffer_size.is_some()
            && config.sanitizer.circular_buffer_duration_s.is_some()
        {
            return Err(Error::Config(
                "circular_buffer_size and circular_buffer_duration_s are mutually exclusive"
                    .to_string(),
            ));
        }
        if config.streams.max_queue_size == 0 {
            return Err(Error::Config("max_queue_size must be positive".to_string()));
        }

        Ok(config)
    }

    fn log_interval(&self) -> Option<Duration> {
        if self.sanitizer.log_interval_s < 0 {
            None
        } else {
            Some(Duration::from_secs(self.sanitizer.log_interval_s as u64))
        }
    }

    pub fn expired_detector_options(&self) -> ExpiredDetectorOptions {
        ExpiredDetectorOptions {
            max_expired_time: Duration::from_secs(self.sanitizer.max_expired_time_s),
            log_interval: self.log_interval(),
        }
    }

    pub fn future_detector_options(&self) -> FutureDetectorOptions {
        FutureDetectorOptions {
            max_future_time: Duration::from_secs(self.sanitizer.max_future_time_s),
            log_interval: self.log_interval(),
        }
    }

    pub fn duplicate_detector_options(&self) -> DuplicateDetectorOptions {
        match (
            self.sanitizer.circular_buffer_size,
            self.sanitizer.circular_buffer_duration_s,
        ) {
            (Some(size), None) => DuplicateDetectorOptions::with_buffer_size(size),
            (None, Some(duration)) => {
                DuplicateDetectorOptions::with_buffer_duration(Duration::from_secs(duration))
            }
            // Neither set: the default retention window.
            _ => DuplicateDetectorOptions::default(),
        }
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            max_queue_size: self.streams.max_queue_size,
        }
    }

    pub fn upstream_options(&self) -> UpstreamOptions {
        UpstreamOptions {
            address: self.upstream.address.clone(),
            reconnect_schedule: self
                .upstream
                .reconnect_schedule_s
                .iter()
                .map(|&s| Duration::from_secs(s))
                .collect(),
            identifier: self.upstream.identifier.clone(),
            auth_token: self.upstream.auth_token.clone(),
        }
    }
}
