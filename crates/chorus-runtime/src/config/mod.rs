//! Configuration module for the Chorus runtime.
//!
//! This module provides layered configuration loading (files, environment,
//! programmatic overrides) and validation for logging, the runtime pipeline,
//! command policies, admins, shared resources and the scope tree.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    ChorusConfig, DispatchConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, NetworkConfig,
    RuntimeConfig, SpanEventConfig,
};
pub use validation::validate_config;
