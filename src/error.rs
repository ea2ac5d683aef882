//! Error types for the monitoring engine.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for monitoring operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for monitoring, alerting and persistence
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Layered configuration could not be built
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Invalid log pattern
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Probe operation failed
    #[error("Probe '{probe}' failed: {message}")]
    Probe { probe: String, message: String },

    /// Probe operation exceeded its timeout
    #[error("Probe '{probe}' timed out after {timeout_ms}ms")]
    ProbeTimeout { probe: String, timeout_ms: u64 },

    /// Alert delivery failed on a channel
    #[error("Delivery via {channel} channel failed: {message}")]
    Channel { channel: String, message: String },

    /// Monitoring loop was driven from an invalid state
    #[error("Invalid monitor state: {0}")]
    InvalidState(String),

    /// Alert not found
    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    /// Alert was already resolved
    #[error("Alert already resolved: {0}")]
    AlertAlreadyResolved(String),

    /// Persistence failure with the affected path
    #[error("Persistence error at {}: {message}", path.display())]
    Persistence { path: PathBuf, message: String },
}

impl Error {
    /// 永続化エラーを作成
    pub fn persistence(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Error::Persistence {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// チャネル配信エラーを作成
    pub fn channel(channel: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Channel {
            channel: channel.into(),
            message: message.to_string(),
        }
    }
}
