//! Listeners shipped with the framework.
//!
//! Registered by [`PluginRegistry::with_builtins`](crate::plugin::PluginRegistry::with_builtins).

mod help;

pub use help::HelpListener;
