//! What a listener receives for one dispatched message.
//!
//! Every listener call gets its own [`ListenerMessage`] (for passive delivery)
//! or [`Invocation`] (for commands). Each carries a reply sink that accepts a
//! single payload, a cancellation token tied to the dispatcher, and the admin
//! check.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use chorus_core::{BoxedBackend, Channel, ChannelSink, InboundMessage, Output, Reply, ReplySink, User};

use crate::admin::AdminPolicy;
use crate::error::ListenerError;
use crate::exception::ExceptionHandler;
use crate::resolver::{ListenerRef, ResolvedContext};
use crate::scope::ScopeContext;

/// A reply sink that forwards at most one payload.
pub struct ReplyOnce {
    inner: Arc<dyn ReplySink>,
    sent: AtomicBool,
    invocation: Uuid,
}

impl ReplyOnce {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn ReplySink>, invocation: Uuid) -> Self {
        Self {
            inner,
            sent: AtomicBool::new(false),
            invocation,
        }
    }

    /// Whether a payload went out.
    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::Acquire)
    }
}

impl ReplySink for ReplyOnce {
    fn deliver(&self, reply: Reply) {
        if self.sent.swap(true, Ordering::AcqRel) {
            warn!(invocation = %self.invocation, "Reply already sent, payload dropped");
            return;
        }
        self.inner.deliver(reply);
    }
}

/// One listener's view of a dispatched message.
#[derive(Clone)]
pub struct ListenerMessage {
    id: Uuid,
    message: Arc<InboundMessage>,
    backend: BoxedBackend,
    context: ScopeContext,
    resolved: Arc<ResolvedContext>,
    listener: Arc<ListenerRef>,
    reply: Arc<ReplyOnce>,
    cancel: CancellationToken,
    admin: Arc<dyn AdminPolicy>,
    exceptions: Arc<ExceptionHandler>,
}

impl ListenerMessage {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        message: Arc<InboundMessage>,
        backend: BoxedBackend,
        context: ScopeContext,
        resolved: Arc<ResolvedContext>,
        listener: Arc<ListenerRef>,
        cancel: CancellationToken,
        admin: Arc<dyn AdminPolicy>,
        exceptions: Arc<ExceptionHandler>,
    ) -> Self {
        let id = Uuid::new_v4();
        let channel = ChannelSink::new(Arc::clone(&backend), message.channel.identifier());
        Self {
            id,
            reply: Arc::new(ReplyOnce::new(Arc::new(channel), id)),
            message,
            backend,
            context,
            resolved,
            listener,
            cancel,
            admin,
            exceptions,
        }
    }

    /// Correlation id for logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The inbound message.
    pub fn message(&self) -> &InboundMessage {
        &self.message
    }

    /// Raw message text.
    pub fn text(&self) -> &str {
        &self.message.text
    }

    /// The channel the message was posted in.
    pub fn channel(&self) -> &Channel {
        &self.message.channel
    }

    /// The message author.
    pub fn user(&self) -> &User {
        &self.message.user
    }

    /// The backend the message came from.
    pub fn backend(&self) -> &BoxedBackend {
        &self.backend
    }

    /// The context the message was resolved in.
    pub fn context(&self) -> &ScopeContext {
        &self.context
    }

    /// The full resolution of that context.
    pub fn resolved(&self) -> &Arc<ResolvedContext> {
        &self.resolved
    }

    /// The listener receiving this message.
    pub fn listener(&self) -> &Arc<ListenerRef> {
        &self.listener
    }

    /// Starts a reply to the message's channel.
    ///
    /// Only the first reply sent through this message is delivered.
    pub fn reply(&self) -> Output {
        Output::new(
            self.backend.kind(),
            Arc::clone(&self.reply) as Arc<dyn ReplySink>,
        )
    }

    /// Whether a reply went out.
    pub fn has_replied(&self) -> bool {
        self.reply.is_sent()
    }

    /// Cancelled when the dispatcher shuts down.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Shorthand for `cancellation().is_cancelled()`.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the author is an admin here.
    pub fn is_admin(&self) -> bool {
        self.admin.is_admin(&self.context, &self.message.user)
    }

    /// Whether the author owns something created by `owner`, or is an admin.
    pub fn is_owner_or_admin(&self, owner: &User) -> bool {
        self.message.user.same_identity(owner) || self.is_admin()
    }

    /// Reports an error raised by background work outside the listener call.
    pub fn escalate(&self, error: ListenerError) {
        self.exceptions.message_failed(self, &error);
    }
}

impl fmt::Debug for ListenerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerMessage")
            .field("id", &self.id)
            .field("listener", &self.listener.name())
            .field("context", &self.context)
            .field("text", &self.message.text)
            .finish_non_exhaustive()
    }
}

/// One command dispatch.
///
/// Dereferences to the underlying [`ListenerMessage`].
#[derive(Clone)]
pub struct Invocation {
    message: ListenerMessage,
    alias: String,
    args: String,
}

impl Invocation {
    pub(crate) fn new(message: ListenerMessage, alias: String, args: String) -> Self {
        Self {
            message,
            alias,
            args,
        }
    }

    /// The alias that matched, normalized.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Trimmed text after the alias.
    pub fn args(&self) -> &str {
        &self.args
    }

    /// The message part of the invocation.
    pub fn as_message(&self) -> &ListenerMessage {
        &self.message
    }

    /// Reports an error raised by background work started for this command.
    ///
    /// The error is logged and the user gets the failure notice, if configured
    /// and nothing was replied yet.
    pub fn escalate(&self, error: ListenerError) {
        self.message
            .exceptions
            .command_failed(&self.message, &self.alias, &error);
    }
}

impl Deref for Invocation {
    type Target = ListenerMessage;

    fn deref(&self) -> &Self::Target {
        &self.message
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("id", &self.message.id)
            .field("listener", &self.message.listener.name())
            .field("alias", &self.alias)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}
