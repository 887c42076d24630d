use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ListenerResult;
use crate::invocation::Invocation;
use crate::plugin::Listener;
use crate::reconcile::{DESCRIPTION_LIMIT, FALLBACK_HELP, abbreviate};
use crate::resolver::ListenerRef;
use crate::scope::{AliasSet, ScopeContext};

/// Lists the commands available where it is invoked, or shows the help of one.
///
/// ```text
/// !help          -> Commands | dice: Rolls dice. | help: Lists available ... | timer: Sets a timer.
/// !help timer    -> timer | Sets a timer.
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct HelpListener;

impl HelpListener {
    /// Plugin type the listener is registered under.
    pub const PLUGIN_TYPE: &'static str = "help";

    /// Creates the listener.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Listener for HelpListener {
    fn default_aliases(&self) -> AliasSet {
        AliasSet::of(["help"])
    }

    async fn on_command(&self, inv: Invocation) -> ListenerResult<()> {
        let mut out = inv.reply();
        let wanted = inv.args().split_whitespace().next();

        match wanted {
            None => {
                out.title("Commands", None);
                // aliases of one listener share its help
                let mut texts: HashMap<&str, String> = HashMap::new();
                let mut any = false;
                for (name, entry) in inv.resolved().exposed_aliases() {
                    let key = entry.listener.name();
                    if !texts.contains_key(key) {
                        let help = entry
                            .listener
                            .help_text(inv.context())
                            .await
                            .filter(|h| !h.trim().is_empty())
                            .unwrap_or_else(|| FALLBACK_HELP.to_string());
                        texts.insert(key, abbreviate(&help, DESCRIPTION_LIMIT));
                    }
                    out.field(name, texts[key].as_str(), false);
                    any = true;
                }
                if !any {
                    out.description().append("No commands available here.");
                }
            }
            Some(name) => match inv.resolved().alias(name) {
                Some(entry) => {
                    let help = entry
                        .listener
                        .help_text(inv.context())
                        .await
                        .filter(|h| !h.trim().is_empty())
                        .unwrap_or_else(|| FALLBACK_HELP.to_string());
                    out.title(name.to_string(), None);
                    out.description().append(&help);
                }
                None => {
                    out.plain().append(&format!("Unknown command: {name}"));
                }
            },
        }

        out.send();
        Ok(())
    }

    async fn help(&self, _ctx: &ScopeContext, _listener: &ListenerRef) -> Option<String> {
        Some("Lists available commands, or shows help for one command.".to_string())
    }
}
