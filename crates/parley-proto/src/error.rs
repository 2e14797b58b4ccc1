//! Error types for parley-proto

use thiserror::Error;

/// Result type alias using parley-proto Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the chat service
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Service returned an error response
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// A single streamed line could not be decoded into an event
    #[error("Undecodable event line: {0}")]
    Decode(String),

    /// Stream was aborted by the caller
    #[error("Request aborted")]
    Aborted,

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl Error {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Whether this error concerns a single event line rather than the
    /// transport as a whole. Decode errors are skippable; everything else
    /// is fatal to the stream.
    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Decode(_))
    }
}
