//! Fixtures shared by the framework's unit tests.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;

use chorus_core::{
    Backend, BackendError, BackendKind, BackendResult, BackendSink, BoxedBackend, Channel,
    CommandListing, CommandRegistry, InboundMessage, Reply, User,
};

use super::{LoadContext, Listener, PluginRegistry};
use crate::error::{InitError, ListenerError, ListenerResult, ShutdownError};
use crate::invocation::{Invocation, ListenerMessage};
use crate::resolver::ListenerRef;
use crate::scope::{AliasSet, CasePolicy, ScopeConfig, ScopeContext, ScopeTree};

// =============================================================================
// Echo plugin
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct EchoConfig {
    pub reply: Option<String>,
    pub passive: bool,
    pub fail: bool,
    pub panic: bool,
    pub panic_help: bool,
    pub fail_init: bool,
    pub resolve_on_init: bool,
    pub help: Option<String>,
    pub wait_cancel: bool,
    pub delay_ms: u64,
}

/// What echo listeners observed.
#[derive(Debug, Default)]
pub(crate) struct Probe {
    /// (listener, alias, args)
    pub commands: Mutex<Vec<(String, String, String)>>,
    /// (listener, was_command)
    pub messages: Mutex<Vec<(String, bool)>>,
    pub inits: Mutex<Vec<String>>,
    pub stops: Mutex<Vec<String>>,
    pub cancelled: AtomicUsize,
    pub help_calls: AtomicUsize,
}

impl Probe {
    pub fn commands(&self) -> Vec<(String, String, String)> {
        self.commands.lock().clone()
    }

    pub fn messages(&self) -> Vec<(String, bool)> {
        self.messages.lock().clone()
    }
}

pub(crate) struct Echo {
    config: EchoConfig,
    probe: Arc<Probe>,
    name: Mutex<Option<String>>,
}

#[async_trait]
impl Listener for Echo {
    fn default_aliases(&self) -> AliasSet {
        AliasSet::of(["echo"])
    }

    fn passive(&self) -> bool {
        self.config.passive
    }

    async fn init(&self, ctx: &LoadContext) -> Result<(), InitError> {
        if self.config.fail_init {
            return Err(InitError::new("init refused"));
        }
        if self.config.resolve_on_init {
            ctx.resolver()
                .resolve(&ScopeContext::network("libera").with_channel("#x"));
        }
        self.probe.inits.lock().push(ctx.name().to_string());
        *self.name.lock() = Some(ctx.name().to_string());
        Ok(())
    }

    async fn on_command(&self, inv: Invocation) -> ListenerResult<()> {
        self.probe.commands.lock().push((
            inv.listener().name().to_string(),
            inv.alias().to_string(),
            inv.args().to_string(),
        ));
        if self.config.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
        }
        if self.config.fail {
            return Err(ListenerError::new("echo failed"));
        }
        if self.config.panic {
            panic!("echo panicked");
        }
        if self.config.wait_cancel {
            inv.cancellation().cancelled().await;
            self.probe.cancelled.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        let text = self.config.reply.clone().unwrap_or_else(|| inv.args().to_string());
        let mut out = inv.reply();
        out.plain().append(&text);
        out.send();
        Ok(())
    }

    async fn on_message(&self, msg: ListenerMessage, was_command: bool) -> ListenerResult<()> {
        self.probe
            .messages
            .lock()
            .push((msg.listener().name().to_string(), was_command));
        if self.config.fail {
            return Err(ListenerError::new("echo failed"));
        }
        Ok(())
    }

    async fn help(&self, _ctx: &ScopeContext, _listener: &ListenerRef) -> Option<String> {
        self.probe.help_calls.fetch_add(1, Ordering::SeqCst);
        if self.config.panic_help {
            panic!("echo help panicked");
        }
        self.config.help.clone()
    }

    async fn stop(&self) -> Result<(), ShutdownError> {
        let name = self.name.lock().clone().unwrap_or_default();
        self.probe.stops.lock().push(name);
        Ok(())
    }
}

pub(crate) fn registry() -> PluginRegistry {
    registry_with(Arc::new(Probe::default()))
}

pub(crate) fn registry_with(probe: Arc<Probe>) -> PluginRegistry {
    let mut registry = PluginRegistry::with_builtins();
    registry.register_config("echo", move |config: EchoConfig| Echo {
        config,
        probe: Arc::clone(&probe),
        name: Mutex::new(None),
    });
    registry
}

pub(crate) fn scope(json: Value) -> ScopeConfig {
    serde_json::from_value(json).expect("valid scope config")
}

pub(crate) fn load(json: Value) -> ScopeTree {
    load_with(json, Arc::new(Probe::default()))
}

pub(crate) fn load_with(json: Value, probe: Arc<Probe>) -> ScopeTree {
    ScopeTree::load(&scope(json), &registry_with(probe), CasePolicy::Insensitive)
        .expect("valid scope tree")
}

/// A message from alice in #x on libera.
pub(crate) fn message(text: &str) -> InboundMessage {
    InboundMessage::new(
        "libera",
        None,
        Channel::irc("#x"),
        User::irc("alice", None),
        text,
    )
}

// =============================================================================
// Mock backend
// =============================================================================

pub(crate) struct MockBackend {
    pub network: String,
    pub kind: BackendKind,
    pub sent: Mutex<Vec<(String, Reply)>>,
    pub registry: Option<Arc<MockRegistry>>,
}

impl MockBackend {
    pub fn irc(network: &str) -> Arc<Self> {
        Arc::new(Self {
            network: network.to_string(),
            kind: BackendKind::Irc,
            sent: Mutex::new(Vec::new()),
            registry: None,
        })
    }

    pub fn discord(network: &str, registry: Arc<MockRegistry>) -> Arc<Self> {
        Arc::new(Self {
            network: network.to_string(),
            kind: BackendKind::Discord,
            sent: Mutex::new(Vec::new()),
            registry: Some(registry),
        })
    }

    pub fn boxed(self: &Arc<Self>) -> BoxedBackend {
        Arc::clone(self) as BoxedBackend
    }

    /// Plain renderings of every delivered reply.
    pub fn sent_text(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|(_, reply)| reply.render_plain(self.kind))
            .collect()
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn network(&self) -> &str {
        &self.network
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn start(self: Arc<Self>, _sink: BackendSink) -> BackendResult<()> {
        Ok(())
    }

    fn deliver(&self, channel: &str, reply: Reply) {
        self.sent.lock().push((channel.to_string(), reply));
    }

    async fn channel(&self, identifier: &str) -> Option<Channel> {
        Some(Channel::irc(identifier))
    }

    async fn user(&self, id: &str) -> Option<User> {
        Some(User::irc(id, None))
    }

    fn command_registry(&self) -> Option<Arc<dyn CommandRegistry>> {
        self.registry
            .as_ref()
            .map(|r| Arc::clone(r) as Arc<dyn CommandRegistry>)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// An in-memory command registry with per-target failure injection.
#[derive(Debug, Default)]
pub(crate) struct MockRegistry {
    pub targets: Mutex<Vec<String>>,
    pub listings: Mutex<HashMap<String, BTreeMap<String, CommandListing>>>,
    pub upserts: AtomicUsize,
    pub deletes: AtomicUsize,
    pub failing: Mutex<HashSet<String>>,
    pub unreachable: Mutex<bool>,
    /// Delay applied to every push.
    pub latency: Mutex<Duration>,
}

impl MockRegistry {
    pub fn with_targets(targets: &[&str]) -> Arc<Self> {
        let registry = Self::default();
        *registry.targets.lock() = targets.iter().map(|t| t.to_string()).collect();
        Arc::new(registry)
    }

    pub fn names(&self, target: &str) -> Vec<String> {
        self.listings
            .lock()
            .get(target)
            .map(|l| l.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst) + self.deletes.load(Ordering::SeqCst)
    }

    fn check(&self, target: &str) -> BackendResult<()> {
        if self.failing.lock().contains(target) {
            return Err(BackendError::Api(format!("target {target} rejected the request")));
        }
        Ok(())
    }
}

#[async_trait]
impl CommandRegistry for MockRegistry {
    async fn targets(&self) -> BackendResult<Vec<String>> {
        if *self.unreachable.lock() {
            return Err(BackendError::NotConnected {
                network: "mock".to_string(),
            });
        }
        Ok(self.targets.lock().clone())
    }

    async fn upsert_command(&self, target: &str, command: &CommandListing) -> BackendResult<()> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.check(target)?;
        self.listings
            .lock()
            .entry(target.to_string())
            .or_default()
            .insert(command.name.clone(), command.clone());
        Ok(())
    }

    async fn delete_command(&self, target: &str, name: &str) -> BackendResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check(target)?;
        if let Some(listings) = self.listings.lock().get_mut(target) {
            listings.remove(name);
        }
        Ok(())
    }
}
