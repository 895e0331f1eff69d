//! Error types for the Niffler E2E toolkit

use std::time::Duration;
use thiserror::Error;

/// Result type alias using the common Error
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration and serialization failures shared by all crates
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid environment variable {name}: {reason}")]
    InvalidEnv { name: String, reason: String },
}

/// Outcome of a failed [`wait_until`](crate::wait::wait_until) session.
///
/// `Probe` carries an error raised by the probe itself; those are never
/// retried. `Timeout` is only produced when the caller asked for it.
#[derive(Error, Debug)]
pub enum WaitError<E> {
    #[error("no result from `{probe}` within {timeout:?}")]
    Timeout { probe: String, timeout: Duration },

    #[error(transparent)]
    Probe(E),
}

impl<E> WaitError<E> {
    /// True when the session ended because the deadline passed
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }
}
