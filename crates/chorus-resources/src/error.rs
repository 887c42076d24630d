//! Error types for the shared resource bundle.

use thiserror::Error;

/// Errors raised while acquiring or using a shared resource.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The SQL source could not be opened or queried.
    #[error("SQL error: {0}")]
    Sql(String),

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(String),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The resource was not configured.
    #[error("Resource '{resource}' is not configured")]
    Unavailable {
        /// The missing resource.
        resource: &'static str,
    },

    /// The bundle has been stopped.
    #[error("Shared resources have been stopped")]
    Stopped,

    /// A blocking task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Join(String),
}

impl From<r2d2::Error> for ResourceError {
    fn from(e: r2d2::Error) -> Self {
        Self::Sql(e.to_string())
    }
}

impl From<rusqlite::Error> for ResourceError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sql(e.to_string())
    }
}

impl From<reqwest::Error> for ResourceError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<tokio::task::JoinError> for ResourceError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Join(e.to_string())
    }
}

/// Result type for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;
