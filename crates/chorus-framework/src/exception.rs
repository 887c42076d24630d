//! Central handling of listener failures.

use std::error::Error as StdError;

use tracing::{error, warn};

use crate::error::ListenerError;
use crate::invocation::ListenerMessage;

/// Notice sent to the channel when a command fails and nothing was replied.
pub const DEFAULT_FAILURE_NOTICE: &str = "Something went wrong while running that command.";

/// Logs listener failures and optionally tells the user.
#[derive(Debug, Clone)]
pub struct ExceptionHandler {
    failure_notice: Option<String>,
}

impl Default for ExceptionHandler {
    fn default() -> Self {
        Self::new(Some(DEFAULT_FAILURE_NOTICE.to_string()))
    }
}

impl ExceptionHandler {
    /// Creates a handler; `None` disables the user-facing notice.
    pub fn new(failure_notice: Option<String>) -> Self {
        Self { failure_notice }
    }

    /// A handler that only logs.
    pub fn silent() -> Self {
        Self::new(None)
    }

    /// The notice sent on command failure, if any.
    pub fn failure_notice(&self) -> Option<&str> {
        self.failure_notice.as_deref()
    }

    /// Handles a failed command invocation.
    pub fn command_failed(&self, message: &ListenerMessage, alias: &str, err: &ListenerError) {
        error!(
            invocation = %message.id(),
            listener = %message.listener().name(),
            alias = %alias,
            context = %message.context(),
            error = %error_chain(err),
            "Command failed"
        );
        self.notify(message);
    }

    /// Handles a failed passive delivery. Never notifies the channel.
    pub fn message_failed(&self, message: &ListenerMessage, err: &ListenerError) {
        warn!(
            invocation = %message.id(),
            listener = %message.listener().name(),
            context = %message.context(),
            error = %error_chain(err),
            "Listener failed on message"
        );
    }

    fn notify(&self, message: &ListenerMessage) {
        let Some(notice) = &self.failure_notice else {
            return;
        };
        if message.has_replied() {
            return;
        }
        let mut out = message.reply();
        out.plain().append(notice);
        out.send();
    }
}

/// Formats an error and its sources as `outer: inner: root`.
pub(crate) fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_chain() {
        let err = ListenerError::with_source("fetch failed", std::io::Error::other("timed out"));
        assert_eq!(error_chain(&err), "fetch failed: timed out");
        assert_eq!(error_chain(&ListenerError::new("plain")), "plain");
    }

    #[test]
    fn test_notice_configuration() {
        assert_eq!(
            ExceptionHandler::default().failure_notice(),
            Some(DEFAULT_FAILURE_NOTICE)
        );
        assert_eq!(ExceptionHandler::silent().failure_notice(), None);
    }
}
