//! Error types for parley-core

use thiserror::Error;

/// Result type alias using parley-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during orchestrator operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the transport layer
    #[error(transparent)]
    Proto(#[from] parley_proto::Error),

    /// A session already exists for this conversation; it must end first
    #[error("Conversation {0} already has an active stream session")]
    SessionActive(String),

    /// The conversation id is not in the local registry
    #[error("Unknown conversation: {0}")]
    UnknownConversation(String),

    /// A generic orchestrator error
    #[error("{0}")]
    Other(String),
}
