//! The scope model.
//!
//! Configuration is a tree of [`ScopeNode`]s. Each node carries a
//! [`Selector`] (a predicate over network, guild, channel, user and command)
//! and a list of listener installations. Resolving a concrete
//! [`ScopeContext`] against the tree yields the listeners active there; see
//! [`crate::resolver`].
//!
//! ```text
//! root (*)                       help, echo
//! ├── network=libera             timer
//! │   └── channel=#offtopic      echo (aliases: say)
//! └── network=discord
//!     └── guild=1234             timer (help overridden)
//! ```

pub mod alias;
pub mod selector;
pub mod tree;

pub use alias::{Alias, AliasConfig, AliasSet, CasePolicy};
pub use selector::{ScopeContext, Selector, SelectorConflict};
pub use tree::{ListenerConfig, ListenerSpec, ScopeConfig, ScopeNode, ScopeTree};
