//! Configuration schema definitions.
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [runtime]
//! workers = 4
//!
//! [dispatch]
//! prefix = "!"
//!
//! [networks.discord]
//! prefix = "/"
//!
//! [[admins]]
//! network = "libera"
//! user = "alice"
//!
//! [resources]
//! database_url = "chorus.db"
//!
//! [[scope.listeners]]
//! plugin = "help"
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use chorus_framework::{
    CasePolicy, CommandPolicy, DEFAULT_FAILURE_NOTICE, DispatcherConfig, ScopeConfig, Selector,
};
use chorus_resources::ResourcesConfig;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChorusConfig {
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Inbound pipeline and shutdown settings.
    pub runtime: RuntimeConfig,
    /// Command recognition defaults.
    pub dispatch: DispatchConfig,
    /// Per-network overrides, keyed by network identifier.
    pub networks: BTreeMap<String, NetworkConfig>,
    /// Contexts whose users are admins.
    pub admins: Vec<Selector>,
    /// Shared resource settings.
    pub resources: ResourcesConfig,
    /// The root scope node.
    pub scope: ScopeConfig,
}

impl ChorusConfig {
    /// Builds the dispatcher settings from `dispatch` and `networks`.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        let default_policy = CommandPolicy::new(&self.dispatch.prefix, self.dispatch.require_prefix);
        let networks = self
            .networks
            .iter()
            .map(|(network, cfg)| {
                let policy = CommandPolicy::new(
                    cfg.prefix.as_deref().unwrap_or(&default_policy.prefix),
                    cfg.require_prefix.unwrap_or(default_policy.require_prefix),
                );
                (network.clone(), policy)
            })
            .collect();
        DispatcherConfig {
            default_policy,
            networks,
            failure_notice: self
                .dispatch
                .failure_notice
                .clone()
                .filter(|notice| !notice.trim().is_empty()),
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything.
    Trace,
    /// Debugging output.
    Debug,
    /// Normal operation.
    #[default]
    Info,
    /// Recoverable problems.
    Warn,
    /// Failures only.
    Error,
}

impl LogLevel {
    /// Lowercase name as used in filter directives.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// The matching `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One compact line per event.
    #[default]
    Compact,
    /// The default `tracing-subscriber` format.
    Full,
    /// Multi-line, human friendly.
    Pretty,
    /// Newline-delimited JSON (requires the `json-log` feature).
    #[cfg(feature = "json-log")]
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Standard output.
    #[default]
    Stdout,
    /// Standard error.
    Stderr,
    /// The file at `logging.file_path`.
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    /// Span created.
    pub new: bool,
    /// Span entered.
    pub enter: bool,
    /// Span exited.
    pub exit: bool,
    /// Span closed.
    pub close: bool,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level.
    pub level: LogLevel,
    /// Line format.
    pub format: LogFormat,
    /// Destination.
    pub output: LogOutput,
    /// Span lifecycle events.
    pub span_events: SpanEventConfig,
    /// Include thread ids.
    pub thread_ids: bool,
    /// Include source file and line.
    pub file_location: bool,
    /// Log file for `output = "file"`.
    pub file_path: Option<PathBuf>,
    /// Per-module levels, e.g. `chorus_framework = "debug"`.
    pub filters: BTreeMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            file_path: None,
            filters: BTreeMap::new(),
        }
    }
}

// =============================================================================
// Runtime
// =============================================================================

/// Inbound pipeline and shutdown settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of tasks consuming the inbound queue.
    pub workers: usize,
    /// Capacity of the inbound queue.
    pub queue_capacity: usize,
    /// How long running listeners get to finish on shutdown, in seconds.
    pub shutdown_grace_secs: u64,
    /// Delay between two command registry reconciliations, in seconds.
    pub reconcile_interval_secs: u64,
    /// Cached resolutions per tree version; `0` disables the cache.
    pub resolution_cache: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            shutdown_grace_secs: 10,
            reconcile_interval_secs: 60,
            resolution_cache: chorus_framework::resolver::DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    /// Shutdown grace period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Reconciliation interval.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Command recognition defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Text every command starts with.
    pub prefix: String,
    /// Whether text without the prefix can still be a command.
    pub require_prefix: bool,
    /// How aliases are compared.
    pub case: CasePolicy,
    /// Notice sent when a command fails without replying; empty or `null`
    /// disables it.
    pub failure_notice: Option<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            prefix: "!".to_string(),
            require_prefix: true,
            case: CasePolicy::Insensitive,
            failure_notice: Some(DEFAULT_FAILURE_NOTICE.to_string()),
        }
    }
}

/// Per-network overrides of [`DispatchConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Command prefix on this network.
    pub prefix: Option<String>,
    /// Whether the prefix is required on this network.
    pub require_prefix: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_config_inherits_defaults() {
        let mut config = ChorusConfig::default();
        config.networks.insert(
            "discord".into(),
            NetworkConfig {
                prefix: Some("/".into()),
                require_prefix: None,
            },
        );
        let dispatch = config.dispatcher_config();
        assert_eq!(dispatch.default_policy, CommandPolicy::new("!", true));
        assert_eq!(dispatch.policy_for("discord"), &CommandPolicy::new("/", true));
        assert_eq!(dispatch.policy_for("libera"), &CommandPolicy::new("!", true));
    }

    #[test]
    fn test_parse_from_json() {
        let config: ChorusConfig = serde_json::from_value(serde_json::json!({
            "logging": { "level": "debug", "filters": { "chorus_framework": "trace" } },
            "dispatch": { "case": "sensitive", "failure_notice": null },
            "admins": [{ "network": "libera", "user": "alice" }],
            "scope": { "listeners": [{ "plugin": "help" }] }
        }))
        .unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.dispatch.case, CasePolicy::Sensitive);
        assert_eq!(config.dispatch.failure_notice, None);
        assert_eq!(config.admins.len(), 1);
        assert_eq!(config.scope.listeners[0].plugin, "help");
        assert_eq!(config.runtime.workers, 4);
    }
}
