//! Error types for the streaming client.

use thiserror::Error;

/// Crate error type.
///
/// Variants map one-to-one onto the failure classes a run can end in, so the
/// submission layer can pick the user-facing message without string matching.
#[derive(Error, Debug)]
pub enum Error {
    /// Local validation failed before any network call was made.
    #[error("Validation error: {0}")]
    Validation(String),

    /// HTTP request failed or the response stream broke mid-read.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Stream read failed below the HTTP layer.
    #[error("Stream read error: {0}")]
    StreamRead(#[source] std::io::Error),

    /// The agent service answered with an error status.
    #[error("Server error ({status}): {message}")]
    ServerStatus {
        /// HTTP status code (explicit or parsed from the error text).
        status: u16,
        /// Raw error text from the service.
        message: String,
    },

    /// The run exceeded the wall-clock guard.
    #[error("Run timed out after {0} seconds")]
    Timeout(u64),

    /// The run was aborted by the client.
    #[error("Run aborted by client")]
    Aborted,

    /// A frame in the event stream could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error (session store, attachments).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Whether this error was raised locally without touching the network.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// HTTP status associated with the error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ServerStatus { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Result type alias for crate operations.
pub type Result<T> = std::result::Result<T, Error>;
