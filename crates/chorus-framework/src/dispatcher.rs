//! Message dispatch.
//!
//! For every inbound message the [`Dispatcher`]:
//!
//! 1. drops it if the bot authored it,
//! 2. resolves the message's [`ScopeContext`],
//! 3. matches at most one command against the resolved aliases using the
//!    network's [`CommandPolicy`] (re-resolving with the `command` attribute
//!    set when the tree has command-scoped nodes),
//! 4. starts the command listener's `on_command` and every passive listener's
//!    `on_message` on their own tasks.
//!
//! ```text
//! InboundMessage ─► resolve ─► match_command ─┬─► on_command(Invocation)        (0..1)
//!                                             └─► on_message(msg, was_command) (0..n)
//! ```
//!
//! Listener errors and panics are caught per task and handed to the
//! [`ExceptionHandler`]; they never affect other listeners or the dispatcher.
//! Dispatch itself never blocks on a listener.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::future::{Ready, ready};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::Service;
use tracing::{Instrument, Level, debug, span, trace};

use chorus_core::{BoxedBackend, InboundMessage};

use crate::admin::{AdminPolicy, NoAdmins};
use crate::error::ListenerError;
use crate::exception::{DEFAULT_FAILURE_NOTICE, ExceptionHandler};
use crate::invocation::{Invocation, ListenerMessage};
use crate::matcher::{CommandMatch, CommandPolicy, match_command};
use crate::resolver::{ContextResolver, ListenerRef, ResolvedContext};
use crate::scope::ScopeContext;

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Policy for networks without their own entry.
    pub default_policy: CommandPolicy,
    /// Per-network command policies.
    pub networks: HashMap<String, CommandPolicy>,
    /// Notice sent when a command fails without replying; `None` disables it.
    pub failure_notice: Option<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_policy: CommandPolicy::default(),
            networks: HashMap::new(),
            failure_notice: Some(DEFAULT_FAILURE_NOTICE.to_string()),
        }
    }
}

impl DispatcherConfig {
    /// The command policy of `network`.
    pub fn policy_for(&self, network: &str) -> &CommandPolicy {
        self.networks.get(network).unwrap_or(&self.default_policy)
    }
}

/// A message together with the backend it came from.
#[derive(Clone)]
pub struct Inbound {
    /// The originating backend.
    pub backend: BoxedBackend,
    /// The message.
    pub message: InboundMessage,
}

impl fmt::Debug for Inbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbound")
            .field("network", &self.backend.network())
            .field("message", &self.message)
            .finish()
    }
}

/// What [`Dispatcher::dispatch`] did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Authored by the bot, or the dispatcher is shutting down.
    Dropped,
    /// No command matched and no listener is passive.
    Ignored,
    /// Listener tasks were started.
    Dispatched {
        /// The alias that matched, if any.
        command: Option<String>,
        /// Number of passive deliveries.
        passive: usize,
    },
}

struct Inner {
    resolver: ContextResolver,
    config: DispatcherConfig,
    admin: Arc<dyn AdminPolicy>,
    exceptions: Arc<ExceptionHandler>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

/// Routes inbound messages to listeners. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    resolver: ContextResolver,
    config: DispatcherConfig,
    admin: Arc<dyn AdminPolicy>,
}

impl DispatcherBuilder {
    /// Sets the dispatcher settings.
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the admin policy exposed to listeners.
    pub fn admin(mut self, admin: Arc<dyn AdminPolicy>) -> Self {
        self.admin = admin;
        self
    }

    /// Builds the dispatcher.
    pub fn build(self) -> Dispatcher {
        let exceptions = Arc::new(ExceptionHandler::new(self.config.failure_notice.clone()));
        Dispatcher {
            inner: Arc::new(Inner {
                resolver: self.resolver,
                config: self.config,
                admin: self.admin,
                exceptions,
                tracker: TaskTracker::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }
}

impl Dispatcher {
    /// Starts building a dispatcher over `resolver`.
    pub fn builder(resolver: ContextResolver) -> DispatcherBuilder {
        DispatcherBuilder {
            resolver,
            config: DispatcherConfig::default(),
            admin: Arc::new(NoAdmins),
        }
    }

    /// A dispatcher with default settings and no admins.
    pub fn new(resolver: ContextResolver) -> Self {
        Self::builder(resolver).build()
    }

    /// The resolver messages are resolved against.
    pub fn resolver(&self) -> &ContextResolver {
        &self.inner.resolver
    }

    /// The dispatcher settings.
    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// Dispatches one message. Returns as soon as the listener tasks were
    /// started.
    pub fn dispatch(&self, backend: BoxedBackend, message: InboundMessage) -> DispatchOutcome {
        if message.from_self {
            trace!(network = %message.network, "Dropping message authored by the bot");
            return DispatchOutcome::Dropped;
        }
        if self.inner.cancel.is_cancelled() {
            debug!(network = %message.network, "Dispatcher shutting down, message dropped");
            return DispatchOutcome::Dropped;
        }

        let message = Arc::new(message);
        let context = ScopeContext::from_message(&message);
        let resolved = self.inner.resolver.resolve(&context);
        let policy = self.inner.config.policy_for(&message.network);
        let matched = match_command(&resolved, policy, &message.text);

        let command = matched.and_then(|m| self.command_scoped(&context, m, &resolved));
        let was_command = command.is_some();

        let mut passive = 0;
        for listener in resolved.passive_listeners() {
            let msg = self.listener_message(&backend, &message, &context, &resolved, listener);
            self.spawn_message(msg, was_command);
            passive += 1;
        }

        let alias = command.map(|(m, ctx, resolved)| {
            let alias = m.alias.clone();
            let msg = self.listener_message(&backend, &message, &ctx, &resolved, &m.listener);
            self.spawn_command(Invocation::new(msg, m.alias, m.args));
            alias
        });

        if alias.is_none() && passive == 0 {
            return DispatchOutcome::Ignored;
        }
        DispatchOutcome::Dispatched {
            command: alias,
            passive,
        }
    }

    /// Number of listener tasks still running.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Signals every running listener task to stop. Messages dispatched
    /// afterwards are dropped.
    pub fn cancel_all(&self) {
        self.inner.cancel.cancel();
    }

    /// Whether [`cancel_all`](Self::cancel_all) was called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Waits until every listener task finished.
    pub async fn drain(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    /// Like [`drain`](Self::drain), giving up after `timeout`. Returns whether
    /// all tasks finished.
    pub async fn drain_timeout(&self, timeout: Duration) -> bool {
        self.inner.tracker.close();
        let drained = tokio::time::timeout(timeout, self.inner.tracker.wait())
            .await
            .is_ok();
        self.inner.tracker.reopen();
        drained
    }

    /// Re-resolves with the command attribute set, so command-scoped nodes
    /// apply to the invocation. An alias the command-scoped resolution does
    /// not map (e.g. a collision introduced there) is no command match.
    fn command_scoped(
        &self,
        context: &ScopeContext,
        matched: CommandMatch,
        resolved: &Arc<ResolvedContext>,
    ) -> Option<(CommandMatch, ScopeContext, Arc<ResolvedContext>)> {
        if !self.inner.resolver.tree().has_command_scopes() {
            return Some((matched, context.clone(), Arc::clone(resolved)));
        }
        let scoped = context.clone().with_command(matched.alias.as_str());
        let rescoped = self.inner.resolver.resolve(&scoped);
        match rescoped.alias(&matched.alias) {
            Some(entry) => {
                let matched = CommandMatch {
                    exposed: entry.exposed,
                    listener: Arc::clone(&entry.listener),
                    ..matched
                };
                Some((matched, scoped, rescoped))
            }
            None => {
                debug!(context = %scoped, alias = %matched.alias, "Alias unresolved for its command scope, ignoring command");
                None
            }
        }
    }

    fn listener_message(
        &self,
        backend: &BoxedBackend,
        message: &Arc<InboundMessage>,
        context: &ScopeContext,
        resolved: &Arc<ResolvedContext>,
        listener: &Arc<ListenerRef>,
    ) -> ListenerMessage {
        ListenerMessage::new(
            Arc::clone(message),
            Arc::clone(backend),
            context.clone(),
            Arc::clone(resolved),
            Arc::clone(listener),
            self.inner.cancel.child_token(),
            Arc::clone(&self.inner.admin),
            Arc::clone(&self.inner.exceptions),
        )
    }

    fn spawn_command(&self, invocation: Invocation) {
        let span = span!(
            Level::INFO,
            "invocation",
            id = %invocation.id(),
            network = %invocation.message().network,
            channel = %invocation.channel().id(),
            listener = %invocation.listener().name(),
            alias = %invocation.alias(),
        );
        let exceptions = Arc::clone(&self.inner.exceptions);
        self.inner.tracker.spawn(
            async move {
                let listener = Arc::clone(invocation.listener().listener());
                debug!(args = %invocation.args(), "Running command");
                let result = AssertUnwindSafe(listener.on_command(invocation.clone()))
                    .catch_unwind()
                    .await;
                let error = match result {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => e,
                    Err(payload) => ListenerError::panic(payload.as_ref()),
                };
                exceptions.command_failed(invocation.as_message(), invocation.alias(), &error);
            }
            .instrument(span),
        );
    }

    fn spawn_message(&self, message: ListenerMessage, was_command: bool) {
        let span = span!(
            Level::DEBUG,
            "passive",
            id = %message.id(),
            network = %message.message().network,
            listener = %message.listener().name(),
            was_command,
        );
        let exceptions = Arc::clone(&self.inner.exceptions);
        self.inner.tracker.spawn(
            async move {
                let listener = Arc::clone(message.listener().listener());
                let result = AssertUnwindSafe(listener.on_message(message.clone(), was_command))
                    .catch_unwind()
                    .await;
                let error = match result {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => e,
                    Err(payload) => ListenerError::panic(payload.as_ref()),
                };
                exceptions.message_failed(&message, &error);
            }
            .instrument(span),
        );
    }
}

impl Service<Inbound> for Dispatcher {
    type Response = DispatchOutcome;
    type Error = Infallible;
    type Future = Ready<Result<DispatchOutcome, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Inbound) -> Self::Future {
        ready(Ok(self.dispatch(req.backend, req.message)))
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("resolver", &self.inner.resolver)
            .field("in_flight", &self.inner.tracker.len())
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::AdminList;
    use crate::error::ListenerResult;
    use crate::plugin::Listener;
    use crate::plugin::testing::{MockBackend, Probe, load_with, message, registry_with};
    use crate::scope::{CasePolicy, Selector, ScopeTree};
    use async_trait::async_trait;
    use chorus_core::{Channel, User};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;

    fn dispatcher(json: Value, probe: &Arc<Probe>) -> Dispatcher {
        Dispatcher::new(ContextResolver::new(load_with(json, Arc::clone(probe))))
    }

    #[tokio::test]
    async fn test_command_reply() {
        let probe = Arc::new(Probe::default());
        let d = dispatcher(
            json!({ "listeners": [{ "plugin": "echo", "name": "ping", "aliases": ["ping"],
                                    "config": { "reply": "pong" } }] }),
            &probe,
        );
        let backend = MockBackend::irc("libera");

        let outcome = d.dispatch(backend.boxed(), message("!ping  now "));
        assert_eq!(
            outcome,
            DispatchOutcome::Dispatched {
                command: Some("ping".into()),
                passive: 0
            }
        );
        d.drain().await;

        assert_eq!(probe.commands(), [("ping".into(), "ping".into(), "now".into())]);
        assert_eq!(backend.sent_text(), ["pong"]);
        assert_eq!(backend.sent.lock()[0].0, "#x");
    }

    #[tokio::test]
    async fn test_ignored_and_self_messages() {
        let probe = Arc::new(Probe::default());
        let d = dispatcher(json!({ "listeners": [{ "plugin": "echo", "aliases": ["ping"] }] }), &probe);
        let backend = MockBackend::irc("libera");

        assert_eq!(d.dispatch(backend.boxed(), message("hello")), DispatchOutcome::Ignored);
        assert_eq!(
            d.dispatch(backend.boxed(), message("!ping").from_self(true)),
            DispatchOutcome::Dropped
        );
        d.drain().await;
        assert!(probe.commands().is_empty());
    }

    #[tokio::test]
    async fn test_passive_listeners_see_every_message() {
        let probe = Arc::new(Probe::default());
        let d = dispatcher(
            json!({ "listeners": [
                { "plugin": "echo", "name": "log", "aliases": [], "passive": true },
                { "plugin": "echo", "name": "ping", "aliases": ["ping"] }
            ]}),
            &probe,
        );
        let backend = MockBackend::irc("libera");

        let outcome = d.dispatch(backend.boxed(), message("!ping"));
        assert_eq!(
            outcome,
            DispatchOutcome::Dispatched {
                command: Some("ping".into()),
                passive: 1
            }
        );
        d.drain().await;
        d.dispatch(backend.boxed(), message("just chatting"));
        d.drain().await;

        assert_eq!(probe.messages(), [("log".into(), true), ("log".into(), false)]);
        assert_eq!(probe.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_noticed() {
        let probe = Arc::new(Probe::default());
        let d = dispatcher(
            json!({ "listeners": [
                { "plugin": "echo", "name": "log", "aliases": [], "passive": true, "config": { "fail": true } },
                { "plugin": "echo", "name": "watch", "aliases": [], "passive": true },
                { "plugin": "echo", "name": "bad", "aliases": ["bad"], "config": { "fail": true } },
                { "plugin": "echo", "name": "boom", "aliases": ["boom"], "config": { "panic": true } },
                { "plugin": "echo", "name": "ok", "aliases": ["ok"], "config": { "reply": "fine" } }
            ]}),
            &probe,
        );
        let backend = MockBackend::irc("libera");

        d.dispatch(backend.boxed(), message("!bad"));
        d.drain().await;
        d.dispatch(backend.boxed(), message("!boom"));
        d.drain().await;
        d.dispatch(backend.boxed(), message("!ok"));
        d.drain().await;

        assert_eq!(
            backend.sent_text(),
            [DEFAULT_FAILURE_NOTICE, DEFAULT_FAILURE_NOTICE, "fine"]
        );
        // the healthy passive listener saw all three messages
        let watched = probe.messages().iter().filter(|(l, _)| l == "watch").count();
        assert_eq!(watched, 3);
    }

    #[tokio::test]
    async fn test_silent_failures() {
        let probe = Arc::new(Probe::default());
        let tree = load_with(
            json!({ "listeners": [{ "plugin": "echo", "aliases": ["bad"], "config": { "fail": true } }] }),
            Arc::clone(&probe),
        );
        let d = Dispatcher::builder(ContextResolver::new(tree))
            .config(DispatcherConfig {
                failure_notice: None,
                ..Default::default()
            })
            .build();
        let backend = MockBackend::irc("libera");
        d.dispatch(backend.boxed(), message("!bad"));
        d.drain().await;
        assert!(backend.sent_text().is_empty());
    }

    struct Twice {
        admin_seen: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Listener for Twice {
        async fn on_command(&self, inv: Invocation) -> ListenerResult<()> {
            self.admin_seen.store(inv.is_admin(), Ordering::SeqCst);
            let mut first = inv.reply();
            first.plain().append("first");
            first.send();
            let mut second = inv.reply();
            second.plain().append("second");
            second.send();
            Err(ListenerError::new("failed after replying"))
        }
    }

    #[tokio::test]
    async fn test_single_reply_and_admin_check() {
        let admin_seen = Arc::new(AtomicBool::new(false));
        let mut registry = registry_with(Arc::new(Probe::default()));
        let seen = Arc::clone(&admin_seen);
        registry.register_config("twice", move |(): ()| Twice {
            admin_seen: Arc::clone(&seen),
        });
        let config = crate::plugin::testing::scope(json!({
            "listeners": [{ "plugin": "twice", "aliases": ["twice"] }]
        }));
        let tree = ScopeTree::load(&config, &registry, CasePolicy::Insensitive).unwrap();
        let admins = AdminList::new(vec![Selector {
            network: Some("libera".into()),
            user: Some("alice".into()),
            ..Default::default()
        }])
        .unwrap();
        let d = Dispatcher::builder(ContextResolver::new(tree))
            .admin(Arc::new(admins))
            .build();
        let backend = MockBackend::irc("libera");

        d.dispatch(backend.boxed(), message("!twice"));
        d.drain().await;

        // second payload dropped, no failure notice after a reply
        assert_eq!(backend.sent_text(), ["first"]);
        assert!(admin_seen.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_all_reaches_running_listeners() {
        let probe = Arc::new(Probe::default());
        let d = dispatcher(
            json!({ "listeners": [{ "plugin": "echo", "aliases": ["wait"], "config": { "wait_cancel": true } }] }),
            &probe,
        );
        let backend = MockBackend::irc("libera");

        d.dispatch(backend.boxed(), message("!wait"));
        tokio::task::yield_now().await;
        assert_eq!(d.in_flight(), 1);

        d.cancel_all();
        d.drain().await;
        assert_eq!(probe.cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(d.in_flight(), 0);
        assert_eq!(d.dispatch(backend.boxed(), message("!wait")), DispatchOutcome::Dropped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_timeout() {
        let probe = Arc::new(Probe::default());
        let d = dispatcher(
            json!({ "listeners": [{ "plugin": "echo", "aliases": ["slow"], "config": { "delay_ms": 5000 } }] }),
            &probe,
        );
        let backend = MockBackend::irc("libera");
        d.dispatch(backend.boxed(), message("!slow"));

        assert!(!d.drain_timeout(Duration::from_secs(1)).await);
        assert!(d.drain_timeout(Duration::from_secs(10)).await);
    }

    #[tokio::test]
    async fn test_command_scoped_override() {
        let probe = Arc::new(Probe::default());
        let d = dispatcher(
            json!({
                "listeners": [{ "plugin": "echo", "name": "p", "aliases": ["ping"], "config": { "reply": "base" } }],
                "children": [{ "match": { "command": "ping" },
                    "listeners": [{ "plugin": "echo", "name": "p", "aliases": ["ping"], "config": { "reply": "scoped" } }]
                }]
            }),
            &probe,
        );
        let backend = MockBackend::irc("libera");
        d.dispatch(backend.boxed(), message("!ping"));
        d.drain().await;
        assert_eq!(backend.sent_text(), ["scoped"]);
    }

    #[tokio::test]
    async fn test_collision_in_command_scope_is_no_match() {
        let probe = Arc::new(Probe::default());
        let d = dispatcher(
            json!({
                "listeners": [
                    { "plugin": "echo", "name": "p", "aliases": ["ping"], "config": { "reply": "base" } },
                    { "plugin": "echo", "name": "log", "aliases": [], "passive": true }
                ],
                "children": [{ "match": { "command": "ping" },
                    "listeners": [
                        { "plugin": "echo", "name": "q", "aliases": ["ping"] },
                        { "plugin": "echo", "name": "r", "aliases": ["ping"] }
                    ]
                }]
            }),
            &probe,
        );
        let backend = MockBackend::irc("libera");

        let outcome = d.dispatch(backend.boxed(), message("!ping"));
        assert_eq!(
            outcome,
            DispatchOutcome::Dispatched {
                command: None,
                passive: 1
            }
        );
        d.drain().await;

        assert!(probe.commands().is_empty());
        assert!(backend.sent_text().is_empty());
        assert_eq!(probe.messages(), [("log".into(), false)]);
    }

    #[tokio::test]
    async fn test_network_policy() {
        let probe = Arc::new(Probe::default());
        let tree = load_with(
            json!({ "listeners": [{ "plugin": "echo", "aliases": ["ping"] }] }),
            Arc::clone(&probe),
        );
        let d = Dispatcher::builder(ContextResolver::new(tree))
            .config(DispatcherConfig {
                networks: HashMap::from([("discord".to_string(), CommandPolicy::new("/", true))]),
                ..Default::default()
            })
            .build();
        let irc = MockBackend::irc("libera");
        let discord_message = || {
            InboundMessage::new(
                "discord",
                Some("g1".into()),
                Channel::discord_guild("g1", "c1", "general"),
                User::discord("42", "alice"),
                "/ping",
            )
        };

        assert!(matches!(
            d.dispatch(irc.boxed(), discord_message()),
            DispatchOutcome::Dispatched { command: Some(_), .. }
        ));
        assert_eq!(d.dispatch(irc.boxed(), message("/ping")), DispatchOutcome::Ignored);
        d.drain().await;
    }

    #[tokio::test]
    async fn test_tower_service() {
        let probe = Arc::new(Probe::default());
        let d = dispatcher(json!({ "listeners": [{ "plugin": "echo", "aliases": ["ping"] }] }), &probe);
        let backend = MockBackend::irc("libera");

        let outcome = d
            .clone()
            .oneshot(Inbound {
                backend: backend.boxed(),
                message: message("!ping hi"),
            })
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Dispatched { .. }));
        d.drain().await;
        assert_eq!(backend.sent_text(), ["hi"]);
    }
}
