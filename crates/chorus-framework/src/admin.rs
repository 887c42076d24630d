//! Admin capability checks.

use chorus_core::User;

use crate::error::ConfigError;
use crate::scope::{ScopeContext, Selector};

/// Decides whether a user may bypass ownership checks in plugins.
pub trait AdminPolicy: Send + Sync + 'static {
    /// Whether `user` is an admin in `ctx`.
    fn is_admin(&self, ctx: &ScopeContext, user: &User) -> bool;
}

/// Nobody is an admin.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAdmins;

impl AdminPolicy for NoAdmins {
    fn is_admin(&self, _ctx: &ScopeContext, _user: &User) -> bool {
        false
    }
}

/// Admins are the contexts matched by any of a list of selectors.
///
/// ```toml
/// [[admins]]
/// network = "libera"
/// user = "alice"
/// ```
#[derive(Debug, Clone, Default)]
pub struct AdminList {
    selectors: Vec<Selector>,
}

impl AdminList {
    /// Builds the list, rejecting selectors that would match everyone.
    pub fn new(selectors: Vec<Selector>) -> Result<Self, ConfigError> {
        for (i, selector) in selectors.iter().enumerate() {
            let label = format!("admins[{i}]");
            selector.validate(&label)?;
            if selector.user.is_none() {
                return Err(ConfigError::invalid(format!(
                    "{label} must name a user, '{selector}' would grant admin to everyone it matches"
                )));
            }
        }
        Ok(Self { selectors })
    }

    /// Number of admin selectors.
    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }
}

impl AdminPolicy for AdminList {
    fn is_admin(&self, ctx: &ScopeContext, user: &User) -> bool {
        let mut ctx = ctx.clone();
        ctx.user = Some(user.id().to_string());
        self.selectors.iter().any(|s| s.evaluate(&ctx))
    }
}
