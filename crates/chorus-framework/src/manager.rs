//! Listener lifecycle management.
//!
//! [`PluginManager`] drives the `init` / `stop` hooks of every listener
//! instance in a [`ScopeTree`]:
//!
//! - [`init_tree`](PluginManager::init_tree) initialises instances in
//!   declaration order. An instance whose `init` fails or panics is marked
//!   [`ListenerState::Failed`] and is treated as absent by resolution; the
//!   others are unaffected. Resolutions cached while listeners were still
//!   initialising are dropped afterwards.
//! - [`stop_tree`](PluginManager::stop_tree) stops them in reverse order.
//!
//! ```rust,ignore
//! let manager = PluginManager::new(resources, resolver.clone(), sync.clone());
//! let report = manager.init_tree(&tree).await;
//! // ...later, after the tree was swapped out
//! manager.stop_tree(&old_tree).await;
//! ```

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use chorus_resources::SharedResources;

use crate::error::{InitError, ShutdownError};
use crate::exception::error_chain;
use crate::plugin::{ListenerInstance, ListenerState, LoadContext};
use crate::reconcile::SyncHandle;
use crate::resolver::ContextResolver;
use crate::scope::ScopeTree;

/// Outcome of [`PluginManager::init_tree`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// Names of instances now active.
    pub active: Vec<String>,
    /// Names of instances whose `init` failed.
    pub failed: Vec<String>,
}

/// Initialises and stops the listener instances of scope trees.
pub struct PluginManager {
    resources: Arc<SharedResources>,
    resolver: ContextResolver,
    sync: SyncHandle,
}

impl PluginManager {
    /// Creates a manager handing `resources`, `resolver` and `sync` to every
    /// listener's `init`.
    pub fn new(resources: Arc<SharedResources>, resolver: ContextResolver, sync: SyncHandle) -> Self {
        Self {
            resources,
            resolver,
            sync,
        }
    }

    /// Initialises every loaded instance of `tree`, in declaration order.
    pub async fn init_tree(&self, tree: &ScopeTree) -> InitReport {
        let mut report = InitReport::default();
        for instance in tree.instances() {
            if instance.state() != ListenerState::Loaded {
                continue;
            }
            match self.init_instance(instance).await {
                Ok(()) => {
                    instance.set_state(ListenerState::Active);
                    info!(listener = %instance.name(), plugin = %instance.plugin(), "Listener active");
                    report.active.push(instance.name().to_string());
                }
                Err(e) => {
                    instance.set_state(ListenerState::Failed);
                    error!(
                        listener = %instance.name(),
                        plugin = %instance.plugin(),
                        error = %error_chain(&e),
                        "Listener failed to initialise and will be ignored"
                    );
                    report.failed.push(instance.name().to_string());
                }
            }
        }
        // init hooks may have resolved contexts before availability settled
        self.resolver.clear_cache();
        report
    }

    /// Stops every active instance of `tree`, in reverse declaration order.
    pub async fn stop_tree(&self, tree: &ScopeTree) {
        for instance in tree.instances().iter().rev() {
            match instance.state() {
                ListenerState::Active => {}
                ListenerState::Loaded | ListenerState::Failed => {
                    instance.set_state(ListenerState::Stopped);
                    continue;
                }
                ListenerState::Stopped => continue,
            }
            if let Err(e) = Self::stop_instance(instance).await {
                warn!(
                    listener = %instance.name(),
                    error = %error_chain(&e),
                    "Listener failed to stop cleanly"
                );
            }
            instance.set_state(ListenerState::Stopped);
            debug!(listener = %instance.name(), "Listener stopped");
        }
    }

    async fn init_instance(&self, instance: &ListenerInstance) -> Result<(), InitError> {
        let ctx = LoadContext::new(
            instance,
            Arc::clone(&self.resources),
            self.resolver.clone(),
            self.sync.clone(),
        );
        match AssertUnwindSafe(instance.listener().init(&ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(InitError::new(format!(
                "init panicked: {}",
                crate::error::ListenerError::panic(payload.as_ref()).message()
            ))),
        }
    }

    async fn stop_instance(instance: &ListenerInstance) -> Result<(), ShutdownError> {
        match AssertUnwindSafe(instance.listener().stop()).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(ShutdownError::new("stop panicked")),
        }
    }
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::testing::{Probe, load_with};
    use crate::scope::ScopeContext;
    use chorus_resources::ResourcesConfig;
    use serde_json::json;

    async fn manager(tree: &ScopeTree) -> (PluginManager, Arc<SharedResources>) {
        let resources = SharedResources::start(&ResourcesConfig::default()).await.unwrap();
        let resolver = ContextResolver::new(ScopeTree::empty(tree.policy()));
        (
            PluginManager::new(Arc::clone(&resources), resolver, SyncHandle::new()),
            resources,
        )
    }

    #[tokio::test]
    async fn test_init_and_stop_order() {
        let probe = Arc::new(Probe::default());
        let tree = load_with(
            json!({
                "listeners": [{ "plugin": "echo", "name": "a" }, { "plugin": "echo", "name": "b", "aliases": ["b"] }],
                "children": [{ "match": { "channel": "#x" },
                    "listeners": [{ "plugin": "echo", "name": "c", "aliases": ["c"] }] }]
            }),
            Arc::clone(&probe),
        );
        let (manager, resources) = manager(&tree).await;

        let report = manager.init_tree(&tree).await;
        assert_eq!(report.active, ["a", "b", "c"]);
        assert_eq!(*probe.inits.lock(), ["a", "b", "c"]);

        manager.stop_tree(&tree).await;
        assert_eq!(*probe.stops.lock(), ["c", "b", "a"]);
        assert!(tree.instances().iter().all(|i| i.state() == ListenerState::Stopped));

        // stopping twice is a no-op
        manager.stop_tree(&tree).await;
        assert_eq!(probe.stops.lock().len(), 3);
        resources.stop().await;
    }

    #[tokio::test]
    async fn test_failed_init_is_isolated() {
        let probe = Arc::new(Probe::default());
        let tree = load_with(
            json!({
                "listeners": [
                    { "plugin": "echo", "name": "bad", "aliases": ["bad"], "config": { "fail_init": true } },
                    { "plugin": "echo", "name": "good", "aliases": ["good"] }
                ]
            }),
            Arc::clone(&probe),
        );
        let (manager, resources) = manager(&tree).await;

        let report = manager.init_tree(&tree).await;
        assert_eq!(report.failed, ["bad"]);
        assert_eq!(report.active, ["good"]);
        assert_eq!(tree.instances()[0].state(), ListenerState::Failed);
        assert!(!tree.instances()[0].is_available());

        manager.stop_tree(&tree).await;
        assert_eq!(*probe.stops.lock(), ["good"]);
        resources.stop().await;
    }

    #[tokio::test]
    async fn test_resolution_during_init_does_not_outlive_failure() {
        let probe = Arc::new(Probe::default());
        let resolver = ContextResolver::new(load_with(
            json!({
                "listeners": [
                    { "plugin": "echo", "name": "early", "aliases": ["early"], "config": { "resolve_on_init": true } },
                    { "plugin": "echo", "name": "bad", "aliases": ["bad"], "config": { "fail_init": true } }
                ]
            }),
            Arc::clone(&probe),
        ));
        let tree = resolver.tree();
        let resources = SharedResources::start(&ResourcesConfig::default()).await.unwrap();
        let manager = PluginManager::new(Arc::clone(&resources), resolver.clone(), SyncHandle::new());

        let report = manager.init_tree(&tree).await;
        assert_eq!(report.failed, ["bad"]);

        let resolved = resolver.resolve(&ScopeContext::network("libera").with_channel("#x"));
        assert!(resolved.alias("bad").is_none());
        assert!(resolved.alias("early").is_some());

        manager.stop_tree(&tree).await;
        resources.stop().await;
    }
}
