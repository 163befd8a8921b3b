//! Error types for the update engine.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the update engine.
#[derive(Error, Debug)]
pub enum Error {
    /// A message failed parse/validation. Per-event: logged and skipped,
    /// never aborts a batch.
    #[error(transparent)]
    Malformed(#[from] podium_core::Error),

    /// Store error on a single operation (before the retry budget is
    /// exhausted, or a non-transient failure such as a type mismatch).
    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    /// The retry budget for a store operation is exhausted. Aborts the
    /// current batch without committing its offset.
    #[error("store unavailable after {attempts} attempts ({op}): {message}")]
    StoreUnavailable {
        /// Which gateway operation failed.
        op: &'static str,
        /// Attempts made, including the first.
        attempts: u32,
        /// Rendered cause.
        message: String,
    },

    /// Event log client error (broker lost, authentication, subscription).
    #[error("log error: {0}")]
    Log(#[from] rdkafka::error::KafkaError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization error on the output path.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error must abort the current batch so that the offset
    /// is not committed and the log client redelivers.
    pub fn aborts_batch(&self) -> bool {
        matches!(self, Error::StoreUnavailable { .. } | Error::Log(_))
    }
}
