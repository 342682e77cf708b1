//! Error types for the host client, the dispatcher, the push channel and config.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("host returned HTTP {status} for {path}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    /// Transport succeeded but the envelope says the operation failed.
    #[error("host reported failure for {path}: {message}")]
    Application { path: String, message: String },

    #[error("could not decode response from {path}: {message}")]
    Decode { path: String, message: String },

    #[error("request to {path} timed out after {after:?}")]
    Timeout { path: String, after: Duration },

    #[error("invalid URL: {0}")]
    Url(String),
}

impl ApiError {
    pub fn is_application(&self) -> bool {
        matches!(self, ApiError::Application { .. })
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    /// Target already has an action in flight.
    #[error("{target} is busy ({pending} in progress)")]
    Busy { target: String, pending: String },

    #[error("no targets given")]
    NoTargets,

    #[error("{action} {target} failed: {reason}")]
    CommandFailed {
        target: String,
        action: String,
        reason: String,
    },

    #[error("{action} {target} timed out after {after:?}")]
    TimedOut {
        target: String,
        action: String,
        after: Duration,
    },

    #[error("dashboard engine is not running")]
    EngineStopped,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("could not connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("channel transport error: {0}")]
    Transport(String),

    #[error("malformed push payload: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
