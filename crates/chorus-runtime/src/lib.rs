//! Chorus Runtime - orchestration layer for the Chorus bot core.
//!
//! This crate provides:
//! - Layered configuration loading and validation ([`config`])
//! - Logging setup ([`logging`])
//! - The [`ChorusRuntime`]: inbound queue and worker pool, reconciliation
//!   scheduling, scope tree reload and ordered shutdown
//!
//! ```rust,ignore
//! use chorus_runtime::ChorusRuntime;
//! use chorus_framework::PluginRegistry;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut plugins = PluginRegistry::with_builtins();
//!     plugins.register_config("dice", |cfg: DiceConfig| Dice::new(cfg));
//!
//!     let runtime = ChorusRuntime::builder().registry(plugins).build()?;
//!     runtime.register_backend(IrcBackend::connect("libera").await?)?;
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ChorusConfig, ConfigError, ConfigLoader, ConfigResult, Profile};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{ChorusRuntime, RuntimeBuilder, wait_for_shutdown};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for plugin and backend code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
