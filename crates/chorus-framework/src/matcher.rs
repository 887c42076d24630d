//! Alias matching.
//!
//! Given a [`ResolvedContext`] and the raw text of a message, find at most one
//! command:
//!
//! 1. Strip the command prefix of the network's [`CommandPolicy`]. If the
//!    policy requires a prefix and the text has none, there is no command.
//! 2. Pick the longest alias the remaining text starts with, compared under
//!    the tree's case policy. The alias must be followed by whitespace or the
//!    end of the text.
//! 3. Everything after the alias, trimmed, is the argument string.
//!
//! ```rust,ignore
//! let policy = CommandPolicy::default(); // prefix "!", required
//! let m = match_command(&resolved, &policy, "!Timer add 5m tea").unwrap();
//! assert_eq!(m.alias, "timer");
//! assert_eq!(m.args, "add 5m tea");
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::resolver::{ListenerRef, ResolvedContext};

/// How commands are recognized on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandPolicy {
    /// Text every command starts with.
    pub prefix: String,
    /// Whether text without the prefix can still be a command.
    pub require_prefix: bool,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            prefix: "!".to_string(),
            require_prefix: true,
        }
    }
}

impl CommandPolicy {
    /// Creates a policy.
    pub fn new(prefix: impl Into<String>, require_prefix: bool) -> Self {
        Self {
            prefix: prefix.into(),
            require_prefix,
        }
    }

    /// Returns the text after the prefix, or `None` if it cannot be a command.
    pub fn strip<'a>(&self, text: &'a str) -> Option<&'a str> {
        if self.prefix.is_empty() {
            return Some(text);
        }
        match text.strip_prefix(self.prefix.as_str()) {
            Some(rest) => Some(rest),
            None if self.require_prefix => None,
            None => Some(text),
        }
    }
}

/// A successful alias match.
#[derive(Debug, Clone)]
pub struct CommandMatch {
    /// The matched alias, normalized.
    pub alias: String,
    /// Trimmed text after the alias.
    pub args: String,
    /// Whether the alias is advertised.
    pub exposed: bool,
    /// The listener answering to the alias.
    pub listener: Arc<ListenerRef>,
}

/// Matches `text` against the aliases of `resolved`.
pub fn match_command(
    resolved: &ResolvedContext,
    policy: &CommandPolicy,
    text: &str,
) -> Option<CommandMatch> {
    let body = policy.strip(text)?;
    // normalization only touches ASCII letters, so byte offsets carry over to `body`
    let normalized = resolved.policy().normalize(body);

    let (alias, entry) = resolved
        .aliases()
        .iter()
        .filter(|(alias, _)| {
            normalized.starts_with(alias.as_str())
                && body[alias.len()..]
                    .chars()
                    .next()
                    .is_none_or(char::is_whitespace)
        })
        .max_by_key(|(alias, _)| alias.len())?;

    Some(CommandMatch {
        alias: alias.clone(),
        args: body[alias.len()..].trim().to_string(),
        exposed: entry.exposed,
        listener: Arc::clone(&entry.listener),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::testing::load;
    use crate::resolver::resolve;
    use crate::scope::{CasePolicy, ScopeContext, ScopeTree};
    use serde_json::json;

    fn resolved(tree: &ScopeTree) -> ResolvedContext {
        resolve(tree, &ScopeContext::network("libera").with_channel("#x"))
    }

    fn tree() -> ScopeTree {
        load(json!({
            "listeners": [
                { "plugin": "echo", "name": "timer", "aliases": ["timer", { "name": "t", "exposed": false }] },
                { "plugin": "echo", "name": "timer-add", "aliases": ["timer add"] },
                { "plugin": "echo", "name": "ping", "aliases": ["ping"] }
            ]
        }))
    }

    #[test]
    fn test_prefix_and_args() {
        let tree = tree();
        let resolved = resolved(&tree);
        let policy = CommandPolicy::default();

        let m = match_command(&resolved, &policy, "!ping   hello world  ").unwrap();
        assert_eq!(m.alias, "ping");
        assert_eq!(m.args, "hello world");

        assert!(match_command(&resolved, &policy, "ping").is_none());
        assert!(match_command(&resolved, &policy, "!pingpong").is_none());
        assert!(match_command(&resolved, &policy, "!nope").is_none());
    }

    #[test]
    fn test_longest_alias_wins() {
        let tree = tree();
        let resolved = resolved(&tree);
        let policy = CommandPolicy::default();

        let m = match_command(&resolved, &policy, "!timer add 5m tea").unwrap();
        assert_eq!(m.listener.name(), "timer-add");
        assert_eq!(m.args, "5m tea");

        let m = match_command(&resolved, &policy, "!timer list").unwrap();
        assert_eq!(m.listener.name(), "timer");
        assert_eq!(m.args, "list");
    }

    #[test]
    fn test_hidden_alias_matches() {
        let tree = tree();
        let resolved = resolved(&tree);
        let m = match_command(&resolved, &CommandPolicy::default(), "!t").unwrap();
        assert_eq!(m.listener.name(), "timer");
        assert!(!m.exposed);
        assert_eq!(m.args, "");
    }

    #[test]
    fn test_case_insensitive_policy() {
        let tree = tree();
        let resolved = resolved(&tree);
        let policy = CommandPolicy::default();
        let upper = match_command(&resolved, &policy, "!Ping x").unwrap();
        let lower = match_command(&resolved, &policy, "!ping x").unwrap();
        assert_eq!(upper.alias, lower.alias);
        assert_eq!(upper.args, "x");
    }

    #[test]
    fn test_case_sensitive_policy() {
        let config = crate::plugin::testing::scope(json!({
            "listeners": [{ "plugin": "echo", "aliases": ["ping"] }]
        }));
        let tree = ScopeTree::load(
            &config,
            &crate::plugin::testing::registry(),
            CasePolicy::Sensitive,
        )
        .unwrap();
        let resolved = resolved(&tree);
        assert!(match_command(&resolved, &CommandPolicy::default(), "!Ping").is_none());
        assert!(match_command(&resolved, &CommandPolicy::default(), "!ping").is_some());
    }

    #[test]
    fn test_optional_prefix() {
        let tree = tree();
        let resolved = resolved(&tree);
        let policy = CommandPolicy::new("!", false);
        assert!(match_command(&resolved, &policy, "ping").is_some());
        assert!(match_command(&resolved, &policy, "!ping").is_some());

        let bare = CommandPolicy::new("", true);
        assert!(match_command(&resolved, &bare, "ping").is_some());
    }
}
