//! # Chorus Core
//!
//! The backend-facing contract of the Chorus bot core.
//!
//! This crate defines everything a chat backend needs to plug into the
//! dispatch engine, and nothing about how messages are routed:
//!
//! - **Backends**: the [`Backend`] trait, the closed [`BackendKind`] set and the
//!   [`BackendSink`] through which events enter the runtime
//! - **Events**: normalized [`InboundMessage`]s and [`BackendEvent`]s
//! - **Entities**: [`Channel`], [`User`] and [`Guild`] handles tagged by backend
//! - **Output**: the [`Output`] builder, [`PlainText`] escaping and the
//!   rendered [`Reply`]
//! - **Command registries**: push-style command publication via
//!   [`CommandRegistry`]
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌────────────┐     ┌──────────┐
//! │ IRC backend  │────▶│              │     │            │────▶│ Listener │
//! └──────────────┘     │ BackendSink  │────▶│ Dispatcher │────▶│ Listener │
//! ┌──────────────┐     │   (queue)    │     │            │────▶│ Listener │
//! │ Discord      │────▶│              │     └────────────┘     └──────────┘
//! └──────────────┘     └──────────────┘
//! ```

pub mod backend;
pub mod entity;
pub mod error;
pub mod event;
pub mod output;

pub use backend::{
    Backend, BackendKind, BackendSink, BoxedBackend, CommandArgument, CommandListing,
    CommandRegistry, Envelope,
};
pub use entity::{
    Channel, DiscordChannelId, Guild, PREFIX_GUILD_CHANNEL, PREFIX_PRIVATE_CHANNEL, User,
};
pub use error::{BackendError, BackendResult};
pub use event::{BackendEvent, InboundMessage, RawHandle};
pub use output::{ChannelSink, Color, Field, Output, PlainText, Reply, ReplySink, TextFormat, escape};

/// Prelude for common imports.
pub mod prelude {
    pub use super::backend::{Backend, BackendKind, BackendSink, BoxedBackend};
    pub use super::entity::{Channel, Guild, User};
    pub use super::event::{BackendEvent, InboundMessage};
    pub use super::output::{Color, Output, TextFormat};
}
