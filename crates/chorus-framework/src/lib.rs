//! # Chorus Framework
//!
//! Scope resolution and message dispatch for the Chorus bot core.
//!
//! This layer provides:
//! - The scope model: [`Selector`]s arranged in a [`ScopeTree`], with
//!   listener installations at every node
//! - Context resolution: [`ContextResolver`] turns a message's
//!   [`ScopeContext`] into the active listeners and aliases
//! - Alias matching with per-network [`CommandPolicy`]s
//! - The [`Dispatcher`], which runs listeners on isolated tasks
//! - The [`Listener`] plugin contract, [`PluginRegistry`] and
//!   [`PluginManager`] for their lifecycle
//! - [`ReconciliationJob`]s that publish exposed aliases to external command
//!   registries
//!
//! ```text
//! ScopeConfig ──load──► ScopeTree ──► ContextResolver ──► Dispatcher ──► Listener
//!                                            │
//!                                            └──► ReconciliationJob ──► CommandRegistry
//! ```

pub mod admin;
pub mod builtin;
pub mod dispatcher;
pub mod error;
pub mod exception;
pub mod invocation;
pub mod manager;
pub mod matcher;
pub mod plugin;
pub mod reconcile;
pub mod resolver;
pub mod scope;

pub use admin::{AdminList, AdminPolicy, NoAdmins};
pub use builtin::HelpListener;
pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherBuilder, DispatcherConfig, Inbound};
pub use error::{
    ConfigError, ConfigResult, InitError, ListenerError, ListenerResult, ListenerResultExt,
    ResolutionError, ShutdownError,
};
pub use exception::{DEFAULT_FAILURE_NOTICE, ExceptionHandler};
pub use invocation::{Invocation, ListenerMessage, ReplyOnce};
pub use manager::{InitReport, PluginManager};
pub use matcher::{CommandMatch, CommandPolicy, match_command};
pub use plugin::{
    Listener, ListenerInstance, ListenerState, LoadContext, PluginFactory, PluginRegistry,
};
pub use reconcile::{ReconcileReport, ReconciliationJob, SyncHandle};
pub use resolver::{ContextResolver, ListenerRef, ResolvedAlias, ResolvedContext, resolve};
pub use scope::{
    Alias, AliasConfig, AliasSet, CasePolicy, ListenerConfig, ListenerSpec, ScopeConfig,
    ScopeContext, ScopeNode, ScopeTree, Selector,
};

/// Everything a plugin implementation usually needs.
pub mod prelude {
    pub use super::error::{ListenerError, ListenerResult, ListenerResultExt};
    pub use super::invocation::{Invocation, ListenerMessage};
    pub use super::plugin::{Listener, LoadContext};
    pub use super::resolver::ListenerRef;
    pub use super::scope::{AliasSet, ScopeContext};
    pub use async_trait::async_trait;
}
