//! Error types for the console backend.

use std::time::Duration;

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum JarvisError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Attachment that cannot be forwarded to the model.
    #[error("invalid attachment: {0}")]
    InvalidAttachment(String),
    /// HTTP client error.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    /// The model API answered with a non-success status.
    #[error("model api returned status {status}: {body}")]
    ApiStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, as far as it could be read.
        body: String,
    },
    /// The model API reported an error inside the stream.
    #[error("model api error: {0}")]
    Api(String),
    /// The response stream broke or carried an undecodable event.
    #[error("stream error: {0}")]
    Stream(String),
    /// No chunk arrived within the idle timeout.
    #[error("stream idle for more than {0:?}")]
    StreamTimeout(Duration),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Persistent state could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Convenience result alias.
pub type JarvisResult<T> = Result<T, JarvisError>;
