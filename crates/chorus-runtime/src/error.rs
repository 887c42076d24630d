//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;
use chorus_resources::ResourceError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or validated, or the scope tree
    /// could not be built.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Shared resources could not be acquired.
    #[error("Failed to start shared resources: {0}")]
    Resources(#[from] ResourceError),

    /// A backend for this network is already registered.
    #[error("A backend for network '{0}' is already registered")]
    DuplicateNetwork(String),

    /// The runtime was already started.
    #[error("Runtime is already running")]
    AlreadyRunning,

    /// The runtime was not started.
    #[error("Runtime is not running")]
    NotRunning,
}

impl From<chorus_framework::ConfigError> for RuntimeError {
    fn from(err: chorus_framework::ConfigError) -> Self {
        Self::Config(ConfigError::Scope(err))
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
