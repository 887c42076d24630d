//! Alias sets and the case policy applied to them.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How alias names are compared.
///
/// Fixed when a scope tree is loaded; every alias of that tree is stored in
/// normalized form and inbound text is normalized the same way before matching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CasePolicy {
    /// Byte-exact comparison.
    Sensitive,
    /// ASCII case-insensitive comparison.
    #[default]
    Insensitive,
}

impl CasePolicy {
    /// Normalizes a name under this policy.
    ///
    /// Never changes the byte length of `name`.
    pub fn normalize<'a>(&self, name: &'a str) -> Cow<'a, str> {
        match self {
            Self::Sensitive => Cow::Borrowed(name),
            Self::Insensitive if name.bytes().any(|b| b.is_ascii_uppercase()) => {
                Cow::Owned(name.to_ascii_lowercase())
            }
            Self::Insensitive => Cow::Borrowed(name),
        }
    }
}

/// One name a listener answers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Alias {
    /// The alias name.
    pub name: String,
    /// Whether the alias is advertised (help listings, command registries).
    pub exposed: bool,
}

impl Alias {
    /// An advertised alias.
    pub fn exposed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exposed: true,
        }
    }

    /// A usable but unadvertised alias.
    pub fn hidden(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exposed: false,
        }
    }
}

/// An ordered set of aliases with unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasSet {
    entries: Vec<Alias>,
}

impl AliasSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set of exposed aliases, silently skipping repeated names.
    pub fn of<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for name in names {
            set.insert(Alias::exposed(name));
        }
        set
    }

    /// Adds an alias. Returns `false` if the name is already present.
    pub fn insert(&mut self, alias: Alias) -> bool {
        if self.contains(&alias.name) {
            return false;
        }
        self.entries.push(alias);
        true
    }

    /// Adds an alias (builder style).
    pub fn with(mut self, alias: Alias) -> Self {
        self.insert(alias);
        self
    }

    /// Whether `name` is in the set.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|a| a.name == name)
    }

    /// Looks up an alias by name.
    pub fn get(&self, name: &str) -> Option<&Alias> {
        self.entries.iter().find(|a| a.name == name)
    }

    /// All aliases in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Alias> {
        self.entries.iter()
    }

    /// Advertised aliases in declaration order.
    pub fn exposed(&self) -> impl Iterator<Item = &Alias> {
        self.entries.iter().filter(|a| a.exposed)
    }

    /// Number of aliases.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the set with every name normalized under `policy`.
    ///
    /// Names that collapse onto an earlier one are dropped.
    pub fn normalized(&self, policy: CasePolicy) -> Self {
        let mut set = Self::new();
        for alias in &self.entries {
            set.insert(Alias {
                name: policy.normalize(&alias.name).into_owned(),
                exposed: alias.exposed,
            });
        }
        set
    }

    /// Builds a normalized set from configuration, rejecting duplicates.
    pub fn from_config(
        entries: &[AliasConfig],
        policy: CasePolicy,
        listener: &str,
    ) -> Result<Self, ConfigError> {
        let mut set = Self::new();
        for entry in entries {
            let alias = entry.to_alias();
            if alias.name.is_empty() || alias.name.trim() != alias.name {
                return Err(ConfigError::InvalidAlias {
                    listener: listener.to_string(),
                    alias: alias.name,
                });
            }
            let name = policy.normalize(&alias.name).into_owned();
            if !set.insert(Alias {
                name: name.clone(),
                exposed: alias.exposed,
            }) {
                return Err(ConfigError::DuplicateAlias {
                    listener: listener.to_string(),
                    alias: name,
                });
            }
        }
        Ok(set)
    }
}

impl<'a> IntoIterator for &'a AliasSet {
    type Item = &'a Alias;
    type IntoIter = std::slice::Iter<'a, Alias>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// An alias as written in configuration: a bare name or a table.
///
/// ```toml
/// aliases = ["timer", { name = "t", exposed = false }]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AliasConfig {
    /// An exposed alias.
    Name(String),
    /// An alias with explicit exposure.
    Full {
        /// The alias name.
        name: String,
        /// Whether the alias is advertised.
        #[serde(default = "default_exposed")]
        exposed: bool,
    },
}

fn default_exposed() -> bool {
    true
}

impl AliasConfig {
    fn to_alias(&self) -> Alias {
        match self {
            Self::Name(name) => Alias::exposed(name.clone()),
            Self::Full { name, exposed } => Alias {
                name: name.clone(),
                exposed: *exposed,
            },
        }
    }
}
