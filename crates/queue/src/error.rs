//! Queue error type.

use taskline_common::AppError;
use thiserror::Error;

/// Queue result type.
pub type QueueResult<T> = Result<T, QueueError>;

/// Error returned by handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Queue error type.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Redis command failed.
    #[error("Redis error: {0}")]
    Redis(String),

    /// A value could not be encoded as JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored payload could not be decoded into its declared type.
    #[error("Failed to deserialize payload of {type_name}: {message}")]
    Deserialization {
        /// Type name carried by the envelope.
        type_name: String,
        /// Decoder message.
        message: String,
    },

    /// No handler is registered for the published type.
    #[error("No handler registered for {0}")]
    UnregisteredType(String),

    /// A handler was given a value of another type.
    #[error("Handler for {expected} received a value of another type")]
    TypeMismatch {
        /// Type name the handler is registered under.
        expected: String,
    },

    /// The handler returned an error.
    #[error("Handler for {type_name} failed: {source}")]
    Handler {
        /// Type name carried by the envelope.
        type_name: String,
        /// Error returned by the handler.
        #[source]
        source: HandlerError,
    },

    /// The handler panicked.
    #[error("Handler for {0} panicked")]
    HandlerPanicked(String),
}

impl From<fred::error::Error> for QueueError {
    fn from(err: fred::error::Error) -> Self {
        Self::Redis(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Redis(message) => Self::Redis(message),
            QueueError::Serialization(message) => Self::Serialization(message),
            other => Self::Queue(other.to_string()),
        }
    }
}
