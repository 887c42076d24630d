//! Selectors and the contexts they are evaluated against.

use std::fmt;

use serde::{Deserialize, Serialize};

use chorus_core::InboundMessage;

use crate::error::ConfigError;

/// The concrete situation a message was received in.
///
/// Used both as the input of a selector and as the key of the resolution cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeContext {
    /// Network identifier of the backend.
    pub network: String,
    /// Guild id, if any.
    pub guild: Option<String>,
    /// Channel id, if any.
    pub channel: Option<String>,
    /// User id, if any.
    pub user: Option<String>,
    /// Matched command name, once known.
    pub command: Option<String>,
}

impl ScopeContext {
    /// A context covering a whole network.
    pub fn network(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            ..Default::default()
        }
    }

    /// The context of an inbound message (without a command).
    pub fn from_message(msg: &InboundMessage) -> Self {
        Self {
            network: msg.network.clone(),
            guild: msg.guild.clone(),
            channel: Some(msg.channel.id().to_string()),
            user: Some(msg.user.id().to_string()),
            command: None,
        }
    }

    /// Sets the guild.
    pub fn with_guild(mut self, guild: impl Into<String>) -> Self {
        self.guild = Some(guild.into());
        self
    }

    /// Sets the channel.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Sets the user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the command name.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }
}

impl fmt::Display for ScopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "network={}", self.network)?;
        for (name, value) in [
            ("guild", &self.guild),
            ("channel", &self.channel),
            ("user", &self.user),
            ("command", &self.command),
        ] {
            if let Some(value) = value {
                write!(f, " {name}={value}")?;
            }
        }
        Ok(())
    }
}

/// Two selectors that can never match together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorConflict {
    /// The attribute both selectors set.
    pub attribute: &'static str,
    /// The outer value.
    pub parent: String,
    /// The inner value.
    pub child: String,
}

/// A predicate over a [`ScopeContext`].
///
/// Every attribute left unset is a wildcard. A set attribute matches only the
/// exact same value, so a `command` attribute never matches a context whose
/// command is not yet known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Selector {
    /// Network identifier.
    pub network: Option<String>,
    /// Guild id.
    pub guild: Option<String>,
    /// Channel id.
    pub channel: Option<String>,
    /// User id.
    pub user: Option<String>,
    /// Command name.
    pub command: Option<String>,
}

impl Selector {
    /// The wildcard selector, matching every context.
    pub fn any() -> Self {
        Self::default()
    }

    fn attributes(&self) -> [(&'static str, &Option<String>); 5] {
        [
            ("network", &self.network),
            ("guild", &self.guild),
            ("channel", &self.channel),
            ("user", &self.user),
            ("command", &self.command),
        ]
    }

    /// Whether `ctx` satisfies every attribute set on this selector.
    pub fn evaluate(&self, ctx: &ScopeContext) -> bool {
        fn check(want: &Option<String>, have: &str) -> bool {
            want.as_deref().is_none_or(|w| w == have)
        }
        fn check_opt(want: &Option<String>, have: &Option<String>) -> bool {
            match want {
                None => true,
                Some(w) => have.as_deref() == Some(w.as_str()),
            }
        }

        check(&self.network, &ctx.network)
            && check_opt(&self.guild, &ctx.guild)
            && check_opt(&self.channel, &ctx.channel)
            && check_opt(&self.user, &ctx.user)
            && check_opt(&self.command, &ctx.command)
    }

    /// Number of non-wildcard attributes.
    pub fn specificity(&self) -> usize {
        self.attributes().iter().filter(|(_, v)| v.is_some()).count()
    }

    /// Whether the selector only matches once a command is known.
    pub fn is_command_scoped(&self) -> bool {
        self.command.is_some()
    }

    /// Whether no attribute is set.
    pub fn is_wildcard(&self) -> bool {
        self.specificity() == 0
    }

    /// Combines this (outer) selector with a nested one.
    ///
    /// Attributes of `inner` are added to the result. An attribute set to
    /// different values on both sides is a conflict.
    pub fn overlay(&self, inner: &Selector) -> Result<Selector, SelectorConflict> {
        fn merge(
            attribute: &'static str,
            outer: &Option<String>,
            inner: &Option<String>,
        ) -> Result<Option<String>, SelectorConflict> {
            match (outer, inner) {
                (Some(o), Some(i)) if o != i => Err(SelectorConflict {
                    attribute,
                    parent: o.clone(),
                    child: i.clone(),
                }),
                (Some(o), _) => Ok(Some(o.clone())),
                (None, i) => Ok(i.clone()),
            }
        }

        Ok(Selector {
            network: merge("network", &self.network, &inner.network)?,
            guild: merge("guild", &self.guild, &inner.guild)?,
            channel: merge("channel", &self.channel, &inner.channel)?,
            user: merge("user", &self.user, &inner.user)?,
            command: merge("command", &self.command, &inner.command)?,
        })
    }

    /// Rejects empty attribute values.
    pub fn validate(&self, node: &str) -> Result<(), ConfigError> {
        for (attribute, value) in self.attributes() {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(ConfigError::EmptyAttribute {
                    node: node.to_string(),
                    attribute,
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            return f.write_str("*");
        }
        let mut first = true;
        for (name, value) in self.attributes() {
            if let Some(value) = value {
                if !first {
                    f.write_str(",")?;
                }
                write!(f, "{name}={value}")?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sel(network: Option<&str>, channel: Option<&str>) -> Selector {
        Selector {
            network: network.map(Into::into),
            channel: channel.map(Into::into),
            ..Default::default()
        }
    }

    #[test]
    fn test_wildcards_and_exact_match() {
        let ctx = ScopeContext::network("libera").with_channel("#x").with_user("alice");

        assert!(Selector::any().evaluate(&ctx));
        assert!(sel(Some("libera"), None).evaluate(&ctx));
        assert!(sel(Some("libera"), Some("#x")).evaluate(&ctx));
        assert!(!sel(Some("libera"), Some("#y")).evaluate(&ctx));
        assert!(!sel(Some("oftc"), None).evaluate(&ctx));
    }

    #[test]
    fn test_command_attribute_needs_known_command() {
        let cmd = Selector {
            command: Some("ping".into()),
            ..Default::default()
        };
        let ctx = ScopeContext::network("libera");
        assert!(!cmd.evaluate(&ctx));
        assert!(cmd.evaluate(&ctx.clone().with_command("ping")));
        assert!(cmd.is_command_scoped());
    }

    #[test]
    fn test_specificity() {
        assert_eq!(Selector::any().specificity(), 0);
        assert_eq!(sel(Some("libera"), Some("#x")).specificity(), 2);
    }

    #[test]
    fn test_overlay_conflict() {
        let parent = sel(Some("libera"), None);
        let merged = parent.overlay(&sel(None, Some("#x"))).unwrap();
        assert_eq!(merged, sel(Some("libera"), Some("#x")));

        let conflict = parent.overlay(&sel(Some("oftc"), None)).unwrap_err();
        assert_eq!(conflict.attribute, "network");
        assert_eq!(conflict.parent, "libera");
        assert_eq!(conflict.child, "oftc");
    }

    #[test]
    fn test_empty_attribute_rejected() {
        let err = sel(Some(""), None).validate("root").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyAttribute { attribute: "network", .. }));
    }

    #[test]
    fn test_display() {
        assert_eq!(Selector::any().to_string(), "*");
        assert_eq!(sel(Some("libera"), Some("#x")).to_string(), "network=libera,channel=#x");
    }
}
