use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::Listener;
use crate::scope::{AliasSet, CasePolicy, ListenerSpec};

/// Lifecycle state of a listener instance.
///
/// ```text
/// load ──► Loaded ──init ok──► Active ──stop──► Stopped
///                 ──init err─► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Instantiated, not yet initialised.
    Loaded,
    /// Initialised and taking part in resolution.
    Active,
    /// `init` failed; treated as absent.
    Failed,
    /// `stop` was called.
    Stopped,
}

/// One installation of a plugin in the scope tree.
pub struct ListenerInstance {
    spec: ListenerSpec,
    listener: Arc<dyn Listener>,
    aliases: AliasSet,
    state: Mutex<ListenerState>,
}

impl ListenerInstance {
    /// Wraps a freshly instantiated listener.
    ///
    /// The final alias set is fixed here: the installation's override, or the
    /// plugin's defaults normalized under `policy`.
    pub fn new(spec: ListenerSpec, listener: Arc<dyn Listener>, policy: CasePolicy) -> Self {
        let aliases = match &spec.aliases {
            Some(aliases) => aliases.clone(),
            None => listener.default_aliases().normalized(policy),
        };
        Self {
            spec,
            listener,
            aliases,
            state: Mutex::new(ListenerState::Loaded),
        }
    }

    /// The installation this instance was built from.
    pub fn spec(&self) -> &ListenerSpec {
        &self.spec
    }

    /// Instance identity.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Plugin type.
    pub fn plugin(&self) -> &str {
        &self.spec.plugin
    }

    /// The listener itself.
    pub fn listener(&self) -> &Arc<dyn Listener> {
        &self.listener
    }

    /// Final alias set.
    pub fn aliases(&self) -> &AliasSet {
        &self.aliases
    }

    /// Whether the instance receives every message.
    pub fn is_passive(&self) -> bool {
        self.spec.passive.unwrap_or_else(|| self.listener.passive())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ListenerState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ListenerState) {
        *self.state.lock() = state;
    }

    /// Whether resolution may pick this instance.
    pub fn is_available(&self) -> bool {
        matches!(self.state(), ListenerState::Loaded | ListenerState::Active)
    }
}

impl fmt::Debug for ListenerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerInstance")
            .field("name", &self.spec.name)
            .field("plugin", &self.spec.plugin)
            .field("aliases", &self.aliases)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
