//! Server configuration
//!
//! Every field has a default, so a JSON config file only needs the values
//! it changes.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Default interval between ping sweeps
pub const DEFAULT_PING_INTERVAL_MS: u64 = 5000;

/// Default idle time before a session is expired
pub const DEFAULT_EXPIRY_MS: u64 = 20000;

/// Construction-time settings for the router container and its dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address for the binary
    pub bind_addr: String,
    /// Size of the shared worker pool
    pub worker_threads: usize,
    /// Sweep period; each sweep pings every open session
    pub ping_interval_ms: u64,
    /// Sessions with no inbound data for this long are expired
    pub expiry_ms: u64,
    /// Unanswered pings tolerated before a session is expired
    pub ping_failure_threshold: u32,
    /// Largest frame payload accepted or sent
    pub max_frame_size: usize,
    /// Largest reassembled message accepted
    pub max_message_size: usize,
    /// How long to wait for the peer's close frame
    pub close_timeout_ms: u64,
    /// Outbound frames a session may have waiting for its writer
    pub max_queued_frames: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_ADDR.to_string(),
            worker_threads: 4,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            expiry_ms: DEFAULT_EXPIRY_MS,
            ping_failure_threshold: 3,
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            close_timeout_ms: 5000,
            max_queued_frames: 1024,
        }
    }
}

impl ServerConfig {
    /// Load from a JSON file and validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the dispatcher cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid("worker_threads must be at least 1".into()));
        }
        if self.ping_interval_ms == 0 {
            return Err(ConfigError::Invalid("ping_interval_ms must be positive".into()));
        }
        if self.expiry_ms == 0 {
            return Err(ConfigError::Invalid("expiry_ms must be positive".into()));
        }
        if self.ping_failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "ping_failure_threshold must be at least 1".into(),
            ));
        }
        if self.max_frame_size == 0 || self.max_message_size == 0 {
            return Err(ConfigError::Invalid("size limits must be positive".into()));
        }
        if self.max_queued_frames == 0 {
            return Err(ConfigError::Invalid("max_queued_frames must be at least 1".into()));
        }
        Ok(())
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn expiry(&self) -> Duration {
        Duration::from_millis(self.expiry_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Build the shared worker pool
    pub fn build_runtime(&self) -> std::io::Result<tokio::runtime::Runtime> {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.worker_threads.max(1))
            .thread_name("ws-worker")
            .enable_all()
            .build()
    }
}
