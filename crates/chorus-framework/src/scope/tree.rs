//! The loaded configuration tree.
//!
//! A [`ScopeTree`] is built once from a [`ScopeConfig`] and never mutated
//! afterwards. Every listener installation is instantiated through the
//! [`PluginRegistry`] while loading, so a tree that loaded successfully only
//! references known plugins with accepted configuration.
//!
//! ```toml
//! [scope]
//! [[scope.listeners]]
//! plugin = "help"
//!
//! [[scope.children]]
//! match = { network = "libera", channel = "#rust" }
//! [[scope.children.listeners]]
//! plugin = "timer"
//! aliases = ["timer", { name = "t", exposed = false }]
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::alias::{AliasConfig, AliasSet, CasePolicy};
use super::selector::{Selector, SelectorConflict};
use crate::error::{ConfigError, ConfigResult};
use crate::plugin::{ListenerInstance, PluginRegistry};

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// Configuration
// =============================================================================

/// One scope node as written in configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScopeConfig {
    /// Label used in logs. Defaults to the selector.
    pub name: Option<String>,
    /// Attributes this node adds to its parent's selector.
    #[serde(rename = "match")]
    pub selector: Selector,
    /// Listener installations.
    pub listeners: Vec<ListenerConfig>,
    /// Nested nodes.
    pub children: Vec<ScopeConfig>,
}

/// One listener installation as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// Plugin type, looked up in the registry.
    pub plugin: String,
    /// Instance identity. Defaults to the plugin type.
    #[serde(default)]
    pub name: Option<String>,
    /// Opaque payload handed to the plugin factory.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Replaces the plugin's default aliases.
    #[serde(default)]
    pub aliases: Option<Vec<AliasConfig>>,
    /// Replaces the plugin's own help text.
    #[serde(default)]
    pub help: Option<String>,
    /// Overrides whether the plugin receives every message.
    #[serde(default)]
    pub passive: Option<bool>,
}

/// A validated listener installation.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerSpec {
    /// Plugin type.
    pub plugin: String,
    /// Instance identity used for override merging.
    pub name: String,
    /// Opaque configuration payload.
    pub config: serde_json::Value,
    /// Alias override, normalized under the tree's case policy.
    pub aliases: Option<AliasSet>,
    /// Help text override.
    pub help: Option<String>,
    /// Passive subscription override.
    pub passive: Option<bool>,
}

impl ListenerSpec {
    /// A spec with no overrides.
    pub fn new(plugin: impl Into<String>) -> Self {
        let plugin = plugin.into();
        Self {
            name: plugin.clone(),
            plugin,
            config: serde_json::Value::Null,
            aliases: None,
            help: None,
            passive: None,
        }
    }

    /// Validates a configuration entry.
    pub fn from_config(config: &ListenerConfig, policy: CasePolicy) -> ConfigResult<Self> {
        if config.plugin.trim().is_empty() {
            return Err(ConfigError::invalid("listener without plugin type"));
        }
        let name = config.name.clone().unwrap_or_else(|| config.plugin.clone());
        if name.trim().is_empty() {
            return Err(ConfigError::invalid(format!(
                "listener of type '{}' has an empty name",
                config.plugin
            )));
        }
        let aliases = config
            .aliases
            .as_deref()
            .map(|entries| AliasSet::from_config(entries, policy, &name))
            .transpose()?;

        Ok(Self {
            plugin: config.plugin.clone(),
            name,
            config: config.config.clone(),
            aliases,
            help: config.help.clone(),
            passive: config.passive,
        })
    }
}

// =============================================================================
// ScopeNode
// =============================================================================

/// A loaded scope node.
pub struct ScopeNode {
    label: String,
    selector: Selector,
    effective: Result<Selector, SelectorConflict>,
    order: usize,
    listeners: Vec<Arc<ListenerInstance>>,
    children: Vec<ScopeNode>,
}

impl ScopeNode {
    /// Label used in logs and origin chains.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The attributes declared on this node.
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// The selector combined with all ancestors, or the conflict preventing it.
    pub fn effective(&self) -> Result<&Selector, &SelectorConflict> {
        self.effective.as_ref()
    }

    /// Specificity of the effective selector.
    pub fn specificity(&self) -> usize {
        self.effective.as_ref().map_or(0, Selector::specificity)
    }

    /// Position in a depth-first pre-order walk of the tree.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Listener installations of this node, in declaration order.
    pub fn listeners(&self) -> &[Arc<ListenerInstance>] {
        &self.listeners
    }

    /// Child nodes, in declaration order.
    pub fn children(&self) -> &[ScopeNode] {
        &self.children
    }
}

impl fmt::Debug for ScopeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeNode")
            .field("label", &self.label)
            .field("effective", &self.effective)
            .field("listeners", &self.listeners.len())
            .field("children", &self.children)
            .finish()
    }
}

// =============================================================================
// ScopeTree
// =============================================================================

/// An immutable, versioned scope tree.
pub struct ScopeTree {
    version: u64,
    policy: CasePolicy,
    root: ScopeNode,
    instances: Vec<Arc<ListenerInstance>>,
    command_scoped: bool,
}

impl ScopeTree {
    /// Loads a tree, instantiating every listener through `registry`.
    ///
    /// Fails on the first unknown plugin, rejected plugin configuration,
    /// empty selector attribute or invalid alias.
    pub fn load(
        config: &ScopeConfig,
        registry: &PluginRegistry,
        policy: CasePolicy,
    ) -> ConfigResult<Self> {
        let mut loader = Loader {
            registry,
            policy,
            next_order: 0,
            instances: Vec::new(),
            command_scoped: false,
        };
        let root = loader.build(config, None)?;
        let tree = Self {
            version: NEXT_VERSION.fetch_add(1, Ordering::Relaxed),
            policy,
            root,
            instances: loader.instances,
            command_scoped: loader.command_scoped,
        };
        debug!(
            version = tree.version,
            nodes = loader.next_order,
            listeners = tree.instances.len(),
            "Scope tree loaded"
        );
        Ok(tree)
    }

    /// A tree with a single empty root.
    pub fn empty(policy: CasePolicy) -> Self {
        Self {
            version: NEXT_VERSION.fetch_add(1, Ordering::Relaxed),
            policy,
            root: ScopeNode {
                label: "root".into(),
                selector: Selector::any(),
                effective: Ok(Selector::any()),
                order: 0,
                listeners: Vec::new(),
                children: Vec::new(),
            },
            instances: Vec::new(),
            command_scoped: false,
        }
    }

    /// Unique version of this tree; every load yields a new one.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The case policy alias names were normalized with.
    pub fn policy(&self) -> CasePolicy {
        self.policy
    }

    /// The root node.
    pub fn root(&self) -> &ScopeNode {
        &self.root
    }

    /// Every listener instance, in declaration (pre-order) order.
    pub fn instances(&self) -> &[Arc<ListenerInstance>] {
        &self.instances
    }

    /// Whether any reachable node carries a `command` attribute.
    pub fn has_command_scopes(&self) -> bool {
        self.command_scoped
    }
}

impl fmt::Debug for ScopeTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeTree")
            .field("version", &self.version)
            .field("policy", &self.policy)
            .field("instances", &self.instances.len())
            .field("root", &self.root)
            .finish()
    }
}

struct Loader<'r> {
    registry: &'r PluginRegistry,
    policy: CasePolicy,
    next_order: usize,
    instances: Vec<Arc<ListenerInstance>>,
    command_scoped: bool,
}

impl Loader<'_> {
    fn build(
        &mut self,
        config: &ScopeConfig,
        parent: Option<&Result<Selector, SelectorConflict>>,
    ) -> ConfigResult<ScopeNode> {
        let label = match (&config.name, parent) {
            (Some(name), _) => name.clone(),
            (None, None) if config.selector.is_wildcard() => "root".to_string(),
            (None, _) => config.selector.to_string(),
        };
        config.selector.validate(&label)?;

        let effective = match parent {
            None => Ok(config.selector.clone()),
            Some(Ok(outer)) => {
                let merged = outer.overlay(&config.selector);
                if let Err(conflict) = &merged {
                    warn!(
                        scope = %label,
                        attribute = conflict.attribute,
                        parent = %conflict.parent,
                        child = %conflict.child,
                        "Scope can never match, its subtree will be skipped"
                    );
                }
                merged
            }
            Some(Err(conflict)) => Err(conflict.clone()),
        };
        if effective.as_ref().is_ok_and(Selector::is_command_scoped) {
            self.command_scoped = true;
        }

        let order = self.next_order;
        self.next_order += 1;

        let mut listeners = Vec::with_capacity(config.listeners.len());
        for entry in &config.listeners {
            let spec = ListenerSpec::from_config(entry, self.policy)?;
            let listener = self.registry.instantiate(&spec, &label)?;
            let instance = Arc::new(ListenerInstance::new(spec, listener, self.policy));
            self.instances.push(Arc::clone(&instance));
            listeners.push(instance);
        }

        let mut children = Vec::with_capacity(config.children.len());
        for child in &config.children {
            children.push(self.build(child, Some(&effective))?);
        }

        Ok(ScopeNode {
            label,
            selector: config.selector.clone(),
            effective,
            order,
            listeners,
            children,
        })
    }
}
