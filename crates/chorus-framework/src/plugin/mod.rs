//! The listener contract.
//!
//! A plugin type is registered as a [`PluginFactory`] under a type name. Every
//! installation of that type in the scope tree is turned into one
//! [`Listener`] instance by the factory, initialised once with a
//! [`LoadContext`] and stopped when its tree is replaced or the runtime shuts
//! down.
//!
//! # Example
//!
//! ```rust,ignore
//! #[derive(Deserialize, Default)]
//! #[serde(default)]
//! struct DiceConfig { sides: u32 }
//!
//! struct Dice { sides: u32 }
//!
//! #[async_trait]
//! impl Listener for Dice {
//!     fn default_aliases(&self) -> AliasSet {
//!         AliasSet::of(["dice", "roll"])
//!     }
//!
//!     async fn on_command(&self, inv: Invocation) -> ListenerResult<()> {
//!         let mut out = inv.reply();
//!         out.plain().append(&format!("{}", roll(self.sides)));
//!         out.send();
//!         Ok(())
//!     }
//! }
//!
//! registry.register_config("dice", |cfg: DiceConfig| Dice { sides: cfg.sides.max(2) });
//! ```

mod instance;
mod registry;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use chorus_resources::SharedResources;

use crate::error::{InitError, ListenerResult, ShutdownError};
use crate::invocation::{Invocation, ListenerMessage};
use crate::reconcile::SyncHandle;
use crate::resolver::{ContextResolver, ListenerRef};
use crate::scope::{AliasSet, ScopeContext};

pub use instance::{ListenerInstance, ListenerState};
pub use registry::{PluginFactory, PluginRegistry};

/// A command and/or message listener.
///
/// Every method has a no-op default, so plugins implement only what they use.
/// Entry points run on their own tasks; errors and panics are caught by the
/// dispatcher and never reach other listeners.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Aliases used when the installation does not override them.
    fn default_aliases(&self) -> AliasSet {
        AliasSet::new()
    }

    /// Whether the listener wants every message, commands included.
    fn passive(&self) -> bool {
        false
    }

    /// Called once before the listener can be resolved.
    ///
    /// A failing listener stays installed but is treated as absent.
    async fn init(&self, _ctx: &LoadContext) -> Result<(), InitError> {
        Ok(())
    }

    /// Handles a message that matched one of this listener's aliases.
    async fn on_command(&self, _invocation: Invocation) -> ListenerResult<()> {
        Ok(())
    }

    /// Handles any message, if the listener is passive.
    async fn on_message(&self, _message: ListenerMessage, _was_command: bool) -> ListenerResult<()> {
        Ok(())
    }

    /// Help text for this listener in the given context.
    async fn help(&self, _ctx: &ScopeContext, _listener: &ListenerRef) -> Option<String> {
        None
    }

    /// Releases background work owned by the listener.
    async fn stop(&self) -> Result<(), ShutdownError> {
        Ok(())
    }
}

/// Everything a listener receives during [`Listener::init`].
#[derive(Clone)]
pub struct LoadContext {
    name: String,
    plugin: String,
    resources: Arc<SharedResources>,
    resolver: ContextResolver,
    sync: SyncHandle,
}

impl LoadContext {
    pub(crate) fn new(
        instance: &ListenerInstance,
        resources: Arc<SharedResources>,
        resolver: ContextResolver,
        sync: SyncHandle,
    ) -> Self {
        Self {
            name: instance.name().to_string(),
            plugin: instance.plugin().to_string(),
            resources,
            resolver,
            sync,
        }
    }

    /// Instance name of the listener being initialised.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plugin type of the listener being initialised.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// The shared resource bundle.
    pub fn resources(&self) -> &Arc<SharedResources> {
        &self.resources
    }

    /// The resolver, for listeners that resolve other contexts (e.g. timers
    /// that fire in a channel later).
    pub fn resolver(&self) -> &ContextResolver {
        &self.resolver
    }

    /// Lets the listener request a fresh command publication.
    pub fn sync(&self) -> &SyncHandle {
        &self.sync
    }
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("name", &self.name)
            .field("plugin", &self.plugin)
            .finish_non_exhaustive()
    }
}
