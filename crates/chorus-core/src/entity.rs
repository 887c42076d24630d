//! Backend-neutral handles for channels, users and guilds.
//!
//! Every handle carries the [`BackendKind`] it originates from. Behaviour that
//! differs between backends (identifiers, mentions, identity comparison) is
//! dispatched on that tag instead of through per-backend types.

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;

/// Identifier prefix for Discord guild text channels.
pub const PREFIX_GUILD_CHANNEL: &str = "G:";

/// Identifier prefix for Discord private (DM) channels.
pub const PREFIX_PRIVATE_CHANNEL: &str = "P:";

// =============================================================================
// Channel
// =============================================================================

/// A channel a message was received in or can be sent to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    backend: BackendKind,
    id: String,
    name: String,
    guild: Option<String>,
    private: bool,
}

impl Channel {
    /// An IRC channel or query.
    ///
    /// Names starting with a channel prefix (`#`, `&`, `+`, `!`) are public
    /// channels; anything else is treated as a private query with that nick.
    pub fn irc(name: impl Into<String>) -> Self {
        let name = name.into();
        let private = !name.starts_with(['#', '&', '+', '!']);
        Self {
            backend: BackendKind::Irc,
            id: name.clone(),
            name,
            guild: None,
            private,
        }
    }

    /// A Discord text channel inside a guild.
    pub fn discord_guild(
        guild: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            backend: BackendKind::Discord,
            id: id.into(),
            name: name.into(),
            guild: Some(guild.into()),
            private: false,
        }
    }

    /// A Discord private channel with the given user.
    pub fn discord_private(user: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::Discord,
            id: user.into(),
            name: name.into(),
            guild: None,
            private: true,
        }
    }

    /// The backend this channel belongs to.
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// The raw backend id (IRC channel name, Discord snowflake or user id for DMs).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human readable name.
    pub fn display_name(&self) -> &str {
        &self.name
    }

    /// The guild this channel belongs to, if any.
    pub fn guild(&self) -> Option<&str> {
        self.guild.as_deref()
    }

    /// Whether this is a one-to-one conversation.
    pub fn is_private(&self) -> bool {
        self.private
    }

    /// A stable identifier that can be fed back into [`Backend::channel`].
    ///
    /// Discord channels are prefixed with [`PREFIX_GUILD_CHANNEL`] or
    /// [`PREFIX_PRIVATE_CHANNEL`]; IRC channels use their name.
    ///
    /// [`Backend::channel`]: crate::backend::Backend::channel
    pub fn identifier(&self) -> String {
        match self.backend {
            BackendKind::Irc => self.id.clone(),
            BackendKind::Discord if self.private => format!("{PREFIX_PRIVATE_CHANNEL}{}", self.id),
            BackendKind::Discord => format!("{PREFIX_GUILD_CHANNEL}{}", self.id),
        }
    }
}

/// A parsed Discord channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscordChannelId<'a> {
    /// A guild text channel id.
    Guild(&'a str),
    /// A user id whose private channel is addressed.
    Private(&'a str),
}

impl<'a> DiscordChannelId<'a> {
    /// Parses an identifier produced by [`Channel::identifier`].
    pub fn parse(identifier: &'a str) -> Option<Self> {
        if let Some(id) = identifier.strip_prefix(PREFIX_GUILD_CHANNEL) {
            return (!id.is_empty()).then_some(Self::Guild(id));
        }
        if let Some(id) = identifier.strip_prefix(PREFIX_PRIVATE_CHANNEL) {
            return (!id.is_empty()).then_some(Self::Private(id));
        }
        None
    }
}

// =============================================================================
// User
// =============================================================================

/// The author of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    backend: BackendKind,
    id: String,
    nickname: String,
    account: Option<String>,
}

impl User {
    /// An IRC user, identified by nickname and optionally a services account.
    pub fn irc(nickname: impl Into<String>, account: Option<String>) -> Self {
        let nickname = nickname.into();
        Self {
            backend: BackendKind::Irc,
            id: nickname.clone(),
            nickname,
            account,
        }
    }

    /// A Discord user.
    pub fn discord(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::Discord,
            id: id.into(),
            nickname: name.into(),
            account: None,
        }
    }

    /// The backend this user belongs to.
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// The raw backend id (nickname on IRC, snowflake on Discord).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human readable name.
    pub fn display_name(&self) -> &str {
        &self.nickname
    }

    /// Services account, if the backend knows one.
    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    /// Text that highlights this user in a message.
    pub fn mention(&self) -> String {
        match self.backend {
            BackendKind::Irc => self.nickname.clone(),
            BackendKind::Discord => format!("<@{}>", self.id),
        }
    }

    /// Whether `other` refers to the same person.
    ///
    /// On IRC a matching services account wins, otherwise the nicknames must be
    /// equal. On Discord ids are compared. Users of different backends are
    /// never the same.
    pub fn same_identity(&self, other: &User) -> bool {
        if self.backend != other.backend {
            return false;
        }
        match self.backend {
            BackendKind::Irc => {
                if let (Some(a), Some(b)) = (&self.account, &other.account)
                    && a == b
                {
                    return true;
                }
                self.nickname == other.nickname
            }
            BackendKind::Discord => self.id == other.id,
        }
    }
}

// =============================================================================
// Guild
// =============================================================================

/// A Discord-style server grouping channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Guild {
    backend: BackendKind,
    id: String,
    name: String,
}

impl Guild {
    /// A Discord guild.
    pub fn discord(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::Discord,
            id: id.into(),
            name: name.into(),
        }
    }

    /// The backend this guild belongs to.
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// The raw guild id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human readable name.
    pub fn display_name(&self) -> &str {
        &self.name
    }
}
