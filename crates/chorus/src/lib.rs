//! # Chorus
//!
//! A chat bot core that serves several networks (IRC, Discord) from one
//! configuration tree.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐     ┌───────────┐     ┌──────────────────────┐     ┌─────────────────────────┐
//! │ Backends │────▶│  Runtime  │────▶│ Dispatcher           │────▶│ Listener (own task)     │
//! │ IRC, ... │     │ (queue,   │     │  resolve scope tree  │────▶│ Listener (own task)     │
//! └──────────┘     │  workers) │     │  match alias         │     └─────────────────────────┘
//!      ▲           └───────────┘     └──────────────────────┘
//!      └──── command listings ◀──── ReconciliationJob
//! ```
//!
//! - **Scope tree**: nested selectors (network, guild, channel, user,
//!   command) deciding which listeners and aliases apply where
//! - **Listeners**: plugins installed in the tree, each call isolated on its
//!   own task
//! - **Backends**: network adapters implementing [`core::Backend`]
//! - **Shared resources**: SQL pool, HTTP client, timer and JSON codec handed
//!   to every listener
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chorus::prelude::*;
//!
//! struct Ping;
//!
//! #[async_trait]
//! impl Listener for Ping {
//!     fn default_aliases(&self) -> AliasSet {
//!         AliasSet::of(["ping"])
//!     }
//!
//!     async fn on_command(&self, inv: Invocation) -> ListenerResult<()> {
//!         let mut out = inv.reply();
//!         out.plain().append("pong");
//!         out.send();
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut plugins = PluginRegistry::with_builtins();
//!     plugins.register_config("ping", |(): ()| Ping);
//!
//!     let runtime = ChorusRuntime::builder().registry(plugins).build()?;
//!     runtime.register_backend(my_backend)?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log lines

pub use chorus_core as core;
pub use chorus_framework as framework;
pub use chorus_resources as resources;
pub use chorus_runtime as runtime;

/// Everything needed to write a listener and run the bot.
pub mod prelude {
    // Runtime
    pub use chorus_runtime::{ChorusConfig, ChorusRuntime, RuntimeError};

    // Plugins
    pub use chorus_framework::prelude::*;
    pub use chorus_framework::{InitError, PluginRegistry, ShutdownError};

    // Backends and output
    pub use chorus_core::prelude::*;
    pub use chorus_core::Reply;

    // Shared resources
    pub use chorus_resources::SharedResources;
}
