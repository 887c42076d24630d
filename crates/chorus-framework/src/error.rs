//! Error types for the Chorus framework.
//!
//! | Error | Raised by | Effect |
//! |-------|-----------|--------|
//! | [`ConfigError`] | tree loading | fatal for the tree being loaded |
//! | [`ResolutionError`] | context resolution | one alias or one subtree is skipped |
//! | [`ListenerError`] | plugin entry points | logged, optional failure notice |
//! | [`InitError`] / [`ShutdownError`] | plugin lifecycle | logged, other plugins unaffected |

use std::fmt;

use thiserror::Error;
use tower::BoxError;

/// Errors raised while loading a scope tree.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No factory is registered for a plugin type.
    #[error("unknown plugin type '{plugin}' in scope '{node}'")]
    UnknownPlugin {
        /// The requested plugin type.
        plugin: String,
        /// Label of the scope node declaring it.
        node: String,
    },

    /// A plugin rejected its configuration payload.
    #[error("invalid configuration for listener '{name}' ({plugin}): {source}")]
    Plugin {
        /// Plugin type.
        plugin: String,
        /// Listener instance name.
        name: String,
        /// Underlying error.
        #[source]
        source: BoxError,
    },

    /// A selector attribute is an empty string.
    #[error("empty '{attribute}' attribute in scope '{node}'")]
    EmptyAttribute {
        /// Label of the scope node.
        node: String,
        /// Attribute name.
        attribute: &'static str,
    },

    /// An alias set declares the same name twice.
    #[error("duplicate alias '{alias}' for listener '{listener}'")]
    DuplicateAlias {
        /// Listener instance name.
        listener: String,
        /// The repeated alias.
        alias: String,
    },

    /// An alias is empty or contains whitespace at its edges.
    #[error("invalid alias '{alias}' for listener '{listener}'")]
    InvalidAlias {
        /// Listener instance name.
        listener: String,
        /// The rejected alias.
        alias: String,
    },

    /// Any other invalid configuration.
    #[error("{0}")]
    Invalid(String),
}

impl ConfigError {
    /// Creates a generic configuration error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Result type for tree loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Recoverable problems found while resolving a context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// Several plugin identities claim the same alias; the alias is dropped.
    #[error("alias '{alias}' is claimed by {}", .listeners.join(", "))]
    AliasCollision {
        /// The contested alias.
        alias: String,
        /// Identities claiming it, in declaration order.
        listeners: Vec<String>,
    },

    /// A child selector contradicts its parent; the subtree is skipped.
    #[error("scope '{node}' sets {attribute}='{child}' inside a parent requiring '{parent}'")]
    InvalidSelector {
        /// Label of the offending node.
        node: String,
        /// The conflicting attribute.
        attribute: &'static str,
        /// The parent's value.
        parent: String,
        /// The child's value.
        child: String,
    },
}

// =============================================================================
// Plugin errors
// =============================================================================

macro_rules! plugin_error {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Error)]
        #[error("{message}")]
        pub struct $name {
            message: String,
            #[source]
            source: Option<BoxError>,
        }

        impl $name {
            /// Creates an error with a message only.
            pub fn new(message: impl Into<String>) -> Self {
                Self {
                    message: message.into(),
                    source: None,
                }
            }

            /// Creates an error wrapping an underlying cause.
            pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
                Self {
                    message: message.into(),
                    source: Some(source.into()),
                }
            }

            /// The error message without its cause.
            pub fn message(&self) -> &str {
                &self.message
            }
        }
    };
}

plugin_error!(
    /// Raised by `on_command` / `on_message`, or a panic caught at the dispatch boundary.
    ListenerError
);

plugin_error!(
    /// Raised by a plugin's `init`.
    InitError
);

plugin_error!(
    /// Raised by a plugin's `stop`.
    ShutdownError
);

impl ListenerError {
    /// Wraps a caught panic payload.
    pub fn panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new(format!("listener panicked: {detail}"))
    }
}

/// Result type for listener entry points.
pub type ListenerResult<T> = Result<T, ListenerError>;

/// Converts foreign errors into [`ListenerError`]s with a message.
pub trait ListenerResultExt<T> {
    /// Wraps the error with `message` as context.
    fn listener_context(self, message: impl fmt::Display) -> ListenerResult<T>;
}

impl<T, E> ListenerResultExt<T> for Result<T, E>
where
    E: Into<BoxError>,
{
    fn listener_context(self, message: impl fmt::Display) -> ListenerResult<T> {
        self.map_err(|e| ListenerError::with_source(message.to_string(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_listener_error_source_chain() {
        let io = std::io::Error::other("pipe closed");
        let err: ListenerResult<()> = Err(io).listener_context("failed to start process");
        let err = err.unwrap_err();
        assert_eq!(err.to_string(), "failed to start process");
        assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("pipe closed"));
    }

    #[test]
    fn test_panic_payloads() {
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("boom"));
        assert_eq!(
            ListenerError::panic(owned.as_ref()).message(),
            "listener panicked: boom"
        );
        let other: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert!(ListenerError::panic(other.as_ref()).message().contains("non-string"));
    }

    #[test]
    fn test_collision_display() {
        let err = ResolutionError::AliasCollision {
            alias: "ping".into(),
            listeners: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "alias 'ping' is claimed by a, b");
    }
}
