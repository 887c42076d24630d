//! Context resolution.
//!
//! [`resolve`] turns a [`ScopeTree`] and a [`ScopeContext`] into a
//! [`ResolvedContext`]: the listeners active in that context, and the alias
//! names they answer to.
//!
//! # Algorithm
//!
//! 1. Walk the tree depth-first. A node is visited only if its parent matched
//!    and its effective selector matches the context. A node whose selector
//!    contradicts its parent yields [`ResolutionError::InvalidSelector`] and
//!    its subtree is skipped.
//! 2. For every listener identity installed at several matching nodes, keep
//!    the installation of the most specific node. Equal specificity falls back
//!    to declaration order, later wins.
//! 3. Map every alias of the surviving listeners to its listener. When
//!    several identities claim an alias, the one installed at the most
//!    specific node takes it. Several identities tied at that specificity
//!    yield [`ResolutionError::AliasCollision`] and the alias is left out.
//!
//! Resolution is pure: no I/O, no plugin calls, no tree mutation.
//!
//! [`ContextResolver`] wraps the current tree behind an atomically swappable
//! handle and caches results per tree version.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::error::{ListenerError, ResolutionError};
use crate::plugin::{Listener, ListenerInstance};
use crate::scope::{AliasSet, CasePolicy, ScopeContext, ScopeNode, ScopeTree};

/// Default number of cached resolutions before the cache is flushed.
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

// =============================================================================
// ListenerRef
// =============================================================================

/// A listener as resolved for one context.
pub struct ListenerRef {
    instance: Arc<ListenerInstance>,
    chain: Vec<String>,
    specificity: usize,
}

impl ListenerRef {
    /// Instance identity.
    pub fn name(&self) -> &str {
        self.instance.name()
    }

    /// Plugin type.
    pub fn plugin(&self) -> &str {
        self.instance.plugin()
    }

    /// The listener implementation.
    pub fn listener(&self) -> &Arc<dyn Listener> {
        self.instance.listener()
    }

    /// The installation that won.
    pub fn instance(&self) -> &Arc<ListenerInstance> {
        &self.instance
    }

    /// Final alias set.
    pub fn aliases(&self) -> &AliasSet {
        self.instance.aliases()
    }

    /// Help text set by the installation, if any.
    pub fn help(&self) -> Option<&str> {
        self.instance.spec().help.as_deref()
    }

    /// Labels of the scope nodes from the root to the winning installation.
    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    /// Specificity of the node the installation came from.
    pub fn specificity(&self) -> usize {
        self.specificity
    }

    /// Whether the listener receives every message.
    pub fn is_passive(&self) -> bool {
        self.instance.is_passive()
    }

    /// The explicit help text, or else whatever the plugin reports.
    ///
    /// A plugin that panics while producing help is treated as having none.
    pub async fn help_text(&self, ctx: &ScopeContext) -> Option<String> {
        if let Some(help) = self.help() {
            return Some(help.to_string());
        }
        match AssertUnwindSafe(self.listener().help(ctx, self))
            .catch_unwind()
            .await
        {
            Ok(help) => help,
            Err(payload) => {
                let err = ListenerError::panic(payload.as_ref());
                error!(listener = %self.name(), context = %ctx, error = %err, "Listener panicked while producing help");
                None
            }
        }
    }
}

impl fmt::Debug for ListenerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRef")
            .field("name", &self.name())
            .field("plugin", &self.plugin())
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// ResolvedContext
// =============================================================================

/// An alias entry of a resolved context.
#[derive(Debug, Clone)]
pub struct ResolvedAlias {
    /// Whether the alias is advertised.
    pub exposed: bool,
    /// The listener answering to it.
    pub listener: Arc<ListenerRef>,
}

/// The outcome of resolving one context.
#[derive(Debug)]
pub struct ResolvedContext {
    context: ScopeContext,
    version: u64,
    policy: CasePolicy,
    aliases: BTreeMap<String, ResolvedAlias>,
    listeners: Vec<Arc<ListenerRef>>,
    errors: Vec<ResolutionError>,
}

impl ResolvedContext {
    /// The context this was resolved for.
    pub fn context(&self) -> &ScopeContext {
        &self.context
    }

    /// Version of the tree this was resolved from.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Case policy of the tree this was resolved from.
    pub fn policy(&self) -> CasePolicy {
        self.policy
    }

    /// Looks up an alias, normalizing `name` under the tree's case policy.
    pub fn alias(&self, name: &str) -> Option<&ResolvedAlias> {
        self.aliases.get(self.policy.normalize(name).as_ref())
    }

    /// Every usable alias, sorted by name.
    pub fn aliases(&self) -> &BTreeMap<String, ResolvedAlias> {
        &self.aliases
    }

    /// Advertised aliases, sorted by name.
    pub fn exposed_aliases(&self) -> impl Iterator<Item = (&str, &ResolvedAlias)> {
        self.aliases
            .iter()
            .filter(|(_, a)| a.exposed)
            .map(|(name, a)| (name.as_str(), a))
    }

    /// Every active listener in declaration order, aliased or not.
    pub fn listeners(&self) -> &[Arc<ListenerRef>] {
        &self.listeners
    }

    /// Active listeners subscribed to every message.
    pub fn passive_listeners(&self) -> impl Iterator<Item = &Arc<ListenerRef>> {
        self.listeners.iter().filter(|l| l.is_passive())
    }

    /// Looks up an active listener by identity.
    pub fn listener(&self, name: &str) -> Option<&Arc<ListenerRef>> {
        self.listeners.iter().find(|l| l.name() == name)
    }

    /// Problems found while resolving.
    pub fn errors(&self) -> &[ResolutionError] {
        &self.errors
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolves `ctx` against `tree`.
pub fn resolve(tree: &ScopeTree, ctx: &ScopeContext) -> ResolvedContext {
    let mut matched = Vec::new();
    let mut errors = Vec::new();
    let mut chain = Vec::new();
    visit(tree.root(), ctx, &mut chain, &mut matched, &mut errors);

    // identity -> (rank, instance, chain, specificity)
    let mut winners: HashMap<&str, Winner<'_>> = HashMap::new();
    for (node, chain) in &matched {
        for (index, instance) in node.listeners().iter().enumerate() {
            if !instance.is_available() {
                continue;
            }
            let rank = (node.specificity(), node.order(), index);
            let candidate = Winner {
                rank,
                position: (node.order(), index),
                instance,
                chain,
                specificity: node.specificity(),
            };
            winners
                .entry(instance.name())
                .and_modify(|current| {
                    if candidate.rank > current.rank {
                        *current = candidate.clone();
                    }
                })
                .or_insert_with(|| candidate.clone());
        }
    }

    let mut ordered: Vec<Winner<'_>> = winners.into_values().collect();
    ordered.sort_by_key(|w| w.position);

    let listeners: Vec<Arc<ListenerRef>> = ordered
        .into_iter()
        .map(|w| {
            Arc::new(ListenerRef {
                instance: Arc::clone(w.instance),
                chain: w.chain.clone(),
                specificity: w.specificity,
            })
        })
        .collect();

    let mut claims: BTreeMap<&str, Vec<(&Arc<ListenerRef>, bool)>> = BTreeMap::new();
    for listener in &listeners {
        for alias in listener.aliases() {
            claims
                .entry(alias.name.as_str())
                .or_default()
                .push((listener, alias.exposed));
        }
    }

    let mut aliases = BTreeMap::new();
    for (name, claimants) in claims {
        // only the claims from the most specific nodes compete
        let top = claimants
            .iter()
            .map(|(l, _)| l.specificity())
            .max()
            .unwrap_or_default();
        let contenders: Vec<_> = claimants
            .into_iter()
            .filter(|(l, _)| l.specificity() == top)
            .collect();
        match contenders.as_slice() {
            [(listener, exposed)] => {
                aliases.insert(
                    name.to_string(),
                    ResolvedAlias {
                        exposed: *exposed,
                        listener: Arc::clone(listener),
                    },
                );
            }
            _ => errors.push(ResolutionError::AliasCollision {
                alias: name.to_string(),
                listeners: contenders.iter().map(|(l, _)| l.name().to_string()).collect(),
            }),
        }
    }

    ResolvedContext {
        context: ctx.clone(),
        version: tree.version(),
        policy: tree.policy(),
        aliases,
        listeners,
        errors,
    }
}

#[derive(Clone)]
struct Winner<'t> {
    rank: (usize, usize, usize),
    position: (usize, usize),
    instance: &'t Arc<ListenerInstance>,
    chain: &'t Vec<String>,
    specificity: usize,
}

fn visit<'t>(
    node: &'t ScopeNode,
    ctx: &ScopeContext,
    chain: &mut Vec<String>,
    matched: &mut Vec<(&'t ScopeNode, Vec<String>)>,
    errors: &mut Vec<ResolutionError>,
) {
    match node.effective() {
        Err(conflict) => {
            errors.push(ResolutionError::InvalidSelector {
                node: node.label().to_string(),
                attribute: conflict.attribute,
                parent: conflict.parent.clone(),
                child: conflict.child.clone(),
            });
            return;
        }
        Ok(selector) if !selector.evaluate(ctx) => return,
        Ok(_) => {}
    }

    chain.push(node.label().to_string());
    matched.push((node, chain.clone()));
    for child in node.children() {
        visit(child, ctx, chain, matched, errors);
    }
    chain.pop();
}

// =============================================================================
// ContextResolver
// =============================================================================

struct ResolutionCache {
    version: u64,
    entries: HashMap<ScopeContext, Arc<ResolvedContext>>,
}

struct ResolverInner {
    tree: RwLock<Arc<ScopeTree>>,
    cache: Mutex<ResolutionCache>,
    capacity: usize,
}

/// Shared, swappable access to the current scope tree.
///
/// Cheap to clone. Every resolution works on one tree snapshot; swapping the
/// tree never affects a resolution in progress.
#[derive(Clone)]
pub struct ContextResolver {
    inner: Arc<ResolverInner>,
}

impl ContextResolver {
    /// Creates a resolver over `tree`.
    pub fn new(tree: ScopeTree) -> Self {
        Self::with_cache_capacity(tree, DEFAULT_CACHE_CAPACITY)
    }

    /// Creates a resolver with a custom cache size; `0` disables caching.
    pub fn with_cache_capacity(tree: ScopeTree, capacity: usize) -> Self {
        let version = tree.version();
        Self {
            inner: Arc::new(ResolverInner {
                tree: RwLock::new(Arc::new(tree)),
                cache: Mutex::new(ResolutionCache {
                    version,
                    entries: HashMap::new(),
                }),
                capacity,
            }),
        }
    }

    /// The current tree.
    pub fn tree(&self) -> Arc<ScopeTree> {
        Arc::clone(&self.inner.tree.read())
    }

    /// Version of the current tree.
    pub fn version(&self) -> u64 {
        self.inner.tree.read().version()
    }

    /// Replaces the tree, returning the previous one.
    pub fn swap(&self, tree: Arc<ScopeTree>) -> Arc<ScopeTree> {
        let old = std::mem::replace(&mut *self.inner.tree.write(), tree);
        self.inner.cache.lock().entries.clear();
        debug!(old = old.version(), new = self.version(), "Scope tree swapped");
        old
    }

    /// Resolves `ctx` against the current tree.
    pub fn resolve(&self, ctx: &ScopeContext) -> Arc<ResolvedContext> {
        let tree = self.tree();

        if self.inner.capacity > 0 {
            let cache = self.inner.cache.lock();
            if cache.version == tree.version()
                && let Some(hit) = cache.entries.get(ctx)
            {
                return Arc::clone(hit);
            }
        }

        let resolved = Arc::new(resolve(&tree, ctx));
        for error in resolved.errors() {
            warn!(context = %ctx, version = tree.version(), error = %error, "Resolution problem");
        }

        if self.inner.capacity > 0 {
            let mut cache = self.inner.cache.lock();
            if cache.version != tree.version() || cache.entries.len() >= self.inner.capacity {
                cache.entries.clear();
                cache.version = tree.version();
            }
            cache.entries.insert(ctx.clone(), Arc::clone(&resolved));
        }
        resolved
    }

    /// Drops every cached resolution.
    pub fn clear_cache(&self) {
        self.inner.cache.lock().entries.clear();
    }
}

impl fmt::Debug for ContextResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextResolver")
            .field("version", &self.version())
            .field("cached", &self.inner.cache.lock().entries.len())
            .finish()
    }
}
