//! Normalized inbound events.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::entity::{Channel, User};

/// The backend-native object an event was built from.
///
/// Plugins that need backend-specific data downcast it, the core never looks
/// inside.
pub type RawHandle = Arc<dyn Any + Send + Sync>;

/// A chat message normalized by a backend.
#[derive(Clone)]
pub struct InboundMessage {
    /// Network identifier of the originating backend.
    pub network: String,
    /// Guild the message was posted in, if the backend has guilds.
    pub guild: Option<String>,
    /// Channel the message was posted in.
    pub channel: Channel,
    /// Author of the message.
    pub user: User,
    /// Raw message text.
    pub text: String,
    /// Whether the bot itself authored the message.
    pub from_self: bool,
    /// Backend-native message object.
    pub raw: Option<RawHandle>,
}

impl InboundMessage {
    /// Creates a message with no raw handle that was not sent by the bot.
    pub fn new(
        network: impl Into<String>,
        guild: Option<String>,
        channel: Channel,
        user: User,
        text: impl Into<String>,
    ) -> Self {
        Self {
            network: network.into(),
            guild,
            channel,
            user,
            text: text.into(),
            from_self: false,
            raw: None,
        }
    }

    /// Marks the message as authored by the bot.
    pub fn from_self(mut self, from_self: bool) -> Self {
        self.from_self = from_self;
        self
    }

    /// Attaches the backend-native message object.
    pub fn with_raw(mut self, raw: RawHandle) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Downcasts the raw handle to a concrete backend type.
    pub fn raw_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.raw.clone()?.downcast::<T>().ok()
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("network", &self.network)
            .field("guild", &self.guild)
            .field("channel", &self.channel.id())
            .field("user", &self.user.id())
            .field("text", &self.text)
            .field("from_self", &self.from_self)
            .finish_non_exhaustive()
    }
}

/// Everything a backend can report to the runtime.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// A chat message.
    Message(InboundMessage),
    /// The bot became part of a new external target (e.g. joined a guild).
    TargetJoined {
        /// The target identifier.
        target: String,
    },
    /// The bot left an external target.
    TargetLeft {
        /// The target identifier.
        target: String,
    },
}

impl BackendEvent {
    /// Returns a short name for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::TargetJoined { .. } => "target_joined",
            Self::TargetLeft { .. } => "target_left",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_downcast() {
        #[derive(Debug, PartialEq)]
        struct VendorMessage(u64);

        let msg = InboundMessage::new(
            "libera",
            None,
            Channel::irc("#rust"),
            User::irc("alice", None),
            "hello",
        )
        .with_raw(Arc::new(VendorMessage(7)));

        assert_eq!(msg.raw_as::<VendorMessage>().as_deref(), Some(&VendorMessage(7)));
        assert!(msg.raw_as::<String>().is_none());
        assert!(!msg.from_self);
    }
}
