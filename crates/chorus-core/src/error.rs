//! Error types shared by backend adapters and the core.
//!
//! Backend failures are owned by the adapter that raised them. The core only
//! ever sees them as a dropped event or a failed external call; they never
//! terminate dispatch.

use thiserror::Error;

/// Errors that can occur in backend adapter operations.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The backend is not connected to its network.
    #[error("backend '{network}' is not connected")]
    NotConnected {
        /// The network identifier of the backend.
        network: String,
    },

    /// The inbound queue is full and the event was dropped.
    #[error("inbound queue is full, dropping event from '{network}'")]
    QueueFull {
        /// The network identifier of the backend.
        network: String,
    },

    /// The runtime stopped accepting events.
    #[error("inbound queue is closed")]
    QueueClosed,

    /// A lookup did not yield a result.
    #[error("{what} '{id}' not found")]
    NotFound {
        /// The kind of entity that was looked up.
        what: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// The remote API rejected a call.
    #[error("API call failed: {0}")]
    Api(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Creates an API error.
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api(message.into())
    }

    /// Creates a not-found error.
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            id: id.into(),
        }
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
