//! Backend trait and the inbound event sink.
//!
//! A backend binds one chat network (an IRC network, a Discord application)
//! to the core. Backends implement the [`Backend`] trait, which combines:
//! - **Lifecycle**: start delivering events into a [`BackendSink`], shut down
//! - **Output**: fire-and-forget delivery of a rendered [`Reply`]
//! - **Lookups**: channel, user and guild handles by id
//! - **Command registry**: optional push-style publication of commands
//!
//! # Architecture
//!
//! ```text
//! vendor threads ─▶ Backend ─▶ BackendSink ─▶ inbound queue ─▶ worker pool ─▶ Dispatcher
//!                     ▲                                                         │
//!                     └──────────────────── Reply ◀─────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! #[async_trait]
//! impl Backend for IrcBackend {
//!     fn network(&self) -> &str { &self.network }
//!     fn kind(&self) -> BackendKind { BackendKind::Irc }
//!
//!     async fn start(self: Arc<Self>, sink: BackendSink) -> BackendResult<()> {
//!         self.client.on_message(move |msg| {
//!             let _ = sink.try_emit(BackendEvent::Message(normalize(msg)));
//!         });
//!         Ok(())
//!     }
//!
//!     fn deliver(&self, channel: &str, reply: Reply) {
//!         let line = reply.render_plain(BackendKind::Irc);
//!         self.client.queue_privmsg(channel, line);
//!     }
//!     // ...
//! }
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::entity::{Channel, Guild, User};
use crate::error::{BackendError, BackendResult};
use crate::event::BackendEvent;
use crate::output::Reply;

// =============================================================================
// BackendKind
// =============================================================================

/// The closed set of supported backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// IRC-style line-based networks.
    Irc,
    /// Discord-style gateways with rich embeds and guilds.
    Discord,
}

impl BackendKind {
    /// Returns the kind as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Irc => "irc",
            Self::Discord => "discord",
        }
    }

    /// Whether replies can carry structured fields (title, fields, color, ...).
    pub fn supports_rich_output(&self) -> bool {
        matches!(self, Self::Discord)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Backend Trait
// =============================================================================

/// The core backend trait.
///
/// Implementations wrap a vendor client library. They normalize inbound
/// messages into [`BackendEvent`]s and render outbound [`Reply`]s; everything
/// protocol-specific stays on their side of this trait.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// The network identifier this backend serves.
    ///
    /// Used as the `network` attribute of every scope selector.
    fn network(&self) -> &str;

    /// The backend family.
    fn kind(&self) -> BackendKind;

    /// Starts delivering events into `sink`.
    ///
    /// Events authored by the bot itself must either be filtered here or
    /// flagged via [`InboundMessage::from_self`](crate::event::InboundMessage).
    async fn start(self: Arc<Self>, sink: BackendSink) -> BackendResult<()>;

    /// Stops delivering events. Called before the dispatcher is torn down.
    async fn shutdown(&self) -> BackendResult<()> {
        Ok(())
    }

    /// Delivers a reply to the channel with the given identifier.
    ///
    /// Must not block: implementations queue the message and log delivery
    /// failures asynchronously.
    fn deliver(&self, channel: &str, reply: Reply);

    /// Looks up a channel by its [`Channel::identifier`].
    async fn channel(&self, identifier: &str) -> Option<Channel>;

    /// Looks up a user by id.
    async fn user(&self, id: &str) -> Option<User>;

    /// Looks up a guild by id. Backends without guilds return `None`.
    async fn guild(&self, _id: &str) -> Option<Guild> {
        None
    }

    /// The external command registry of this backend, if it has one.
    fn command_registry(&self) -> Option<Arc<dyn CommandRegistry>> {
        None
    }

    /// Returns self as an `Arc<dyn Any>` for downcasting to the concrete backend.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A boxed backend trait object.
pub type BoxedBackend = Arc<dyn Backend>;

// =============================================================================
// Command Registry
// =============================================================================

/// One command as published to an external registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandListing {
    /// Command name (an exposed alias).
    pub name: String,
    /// Short description shown by the client.
    pub description: String,
    /// Optional free-form string argument.
    pub argument: Option<CommandArgument>,
}

/// The single free-form argument of a published command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandArgument {
    /// Argument name.
    pub name: String,
    /// Argument description.
    pub description: String,
}

/// Push-style command publication (e.g. per-guild slash commands).
///
/// A *target* is whatever the registry scopes its command lists by; for
/// Discord this is a guild id.
#[async_trait]
pub trait CommandRegistry: Send + Sync {
    /// All targets currently known to the backend.
    async fn targets(&self) -> BackendResult<Vec<String>>;

    /// Creates or replaces one command on a target.
    async fn upsert_command(&self, target: &str, command: &CommandListing) -> BackendResult<()>;

    /// Removes one command from a target.
    async fn delete_command(&self, target: &str, name: &str) -> BackendResult<()>;
}

// =============================================================================
// Backend Sink
// =============================================================================

/// An event together with the backend it came from.
pub struct Envelope {
    /// The originating backend.
    pub backend: BoxedBackend,
    /// The normalized event.
    pub event: BackendEvent,
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("network", &self.backend.network())
            .field("event", &self.event)
            .finish()
    }
}

/// Handle through which a backend feeds events into the runtime.
///
/// Cheap to clone; safe to use from vendor-managed threads via
/// [`try_emit`](Self::try_emit).
#[derive(Clone)]
pub struct BackendSink {
    backend: BoxedBackend,
    tx: mpsc::Sender<Envelope>,
}

impl BackendSink {
    /// Creates a sink that tags every event with `backend`.
    pub fn new(backend: BoxedBackend, tx: mpsc::Sender<Envelope>) -> Self {
        Self { backend, tx }
    }

    /// Queues an event, waiting for capacity.
    pub async fn emit(&self, event: BackendEvent) -> BackendResult<()> {
        self.tx
            .send(Envelope {
                backend: Arc::clone(&self.backend),
                event,
            })
            .await
            .map_err(|_| BackendError::QueueClosed)
    }

    /// Queues an event without waiting. Full queues drop the event.
    pub fn try_emit(&self, event: BackendEvent) -> BackendResult<()> {
        let envelope = Envelope {
            backend: Arc::clone(&self.backend),
            event,
        };
        self.tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                let network = self.backend.network().to_string();
                warn!(network = %network, "Inbound queue full, event dropped");
                BackendError::QueueFull { network }
            }
            mpsc::error::TrySendError::Closed(_) => BackendError::QueueClosed,
        })
    }

    /// Whether the runtime stopped accepting events.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for BackendSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSink")
            .field("network", &self.backend.network())
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}
