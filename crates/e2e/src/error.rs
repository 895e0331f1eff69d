//! Error types for E2E helpers

use std::time::Duration;
use thiserror::Error;

use niffler_common::WaitError;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("No new message on '{topic}' matching {expected} within {timeout:?}")]
    MessageNotFound {
        topic: String,
        expected: String,
        timeout: Duration,
    },

    #[error("{what} not found within {timeout:?}; last error: {}", .last_error.as_deref().unwrap_or("none"))]
    RowNotFound {
        what: String,
        timeout: Duration,
        last_error: Option<String>,
    },

    #[error("Timeout waiting for: {probe} ({timeout:?})")]
    Timeout { probe: String, timeout: Duration },

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Message bus error: {0}")]
    Bus(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Scenario not found: {0}")]
    ScenarioNotFound(String),

    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Config error: {0}")]
    Config(#[from] niffler_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

impl From<WaitError<E2eError>> for E2eError {
    fn from(err: WaitError<E2eError>) -> Self {
        match err {
            WaitError::Timeout { probe, timeout } => E2eError::Timeout { probe, timeout },
            WaitError::Probe(inner) => inner,
        }
    }
}
