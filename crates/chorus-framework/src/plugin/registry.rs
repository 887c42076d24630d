//! Plugin factories keyed by plugin type.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tower::BoxError;
use tracing::debug;

use super::Listener;
use crate::builtin::HelpListener;
use crate::error::{ConfigError, ConfigResult};
use crate::scope::ListenerSpec;

/// Builds listener instances from their installation.
///
/// Implemented for every `Fn(&ListenerSpec) -> Result<Arc<dyn Listener>, BoxError>`.
pub trait PluginFactory: Send + Sync + 'static {
    /// Validates the installation's configuration and builds an instance.
    fn load(&self, spec: &ListenerSpec) -> Result<Arc<dyn Listener>, BoxError>;
}

impl<F> PluginFactory for F
where
    F: Fn(&ListenerSpec) -> Result<Arc<dyn Listener>, BoxError> + Send + Sync + 'static,
{
    fn load(&self, spec: &ListenerSpec) -> Result<Arc<dyn Listener>, BoxError> {
        self(spec)
    }
}

/// The set of plugin types a scope tree may install.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, Arc<dyn PluginFactory>>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in listeners (`help`).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_config(HelpListener::PLUGIN_TYPE, |(): ()| HelpListener::new());
        registry
    }

    /// Registers a factory, replacing any previous one for the same type.
    pub fn register<F>(&mut self, plugin_type: impl Into<String>, factory: F) -> &mut Self
    where
        F: PluginFactory,
    {
        let plugin_type = plugin_type.into();
        debug!(plugin = %plugin_type, "Plugin type registered");
        self.factories.insert(plugin_type, Arc::new(factory));
        self
    }

    /// Registers a plugin whose configuration payload deserializes into `C`.
    ///
    /// An absent payload is read as an empty table, so `#[serde(default)]`
    /// configuration structs accept it.
    pub fn register_config<C, L, F>(&mut self, plugin_type: impl Into<String>, build: F) -> &mut Self
    where
        C: DeserializeOwned + 'static,
        L: Listener,
        F: Fn(C) -> L + Send + Sync + 'static,
    {
        self.register(
            plugin_type,
            move |spec: &ListenerSpec| -> Result<Arc<dyn Listener>, BoxError> {
                let raw = match &spec.config {
                    serde_json::Value::Null => serde_json::Value::Object(Default::default()),
                    other => other.clone(),
                };
                let config = match serde_json::from_value::<C>(raw.clone()) {
                    Ok(config) => config,
                    // unit configs accept an empty table
                    Err(e) if raw.as_object().is_some_and(|o| o.is_empty()) => {
                        serde_json::from_value::<C>(serde_json::Value::Null).map_err(|_| e)?
                    }
                    Err(e) => return Err(e.into()),
                };
                Ok(Arc::new(build(config)) as Arc<dyn Listener>)
            },
        )
    }

    /// Whether `plugin_type` is registered.
    pub fn contains(&self, plugin_type: &str) -> bool {
        self.factories.contains_key(plugin_type)
    }

    /// Registered plugin types in sorted order.
    pub fn plugin_types(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Builds the listener for one installation.
    pub fn instantiate(&self, spec: &ListenerSpec, node: &str) -> ConfigResult<Arc<dyn Listener>> {
        let factory = self
            .factories
            .get(&spec.plugin)
            .ok_or_else(|| ConfigError::UnknownPlugin {
                plugin: spec.plugin.clone(),
                node: node.to_string(),
            })?;
        factory.load(spec).map_err(|source| ConfigError::Plugin {
            plugin: spec.plugin.clone(),
            name: spec.name.clone(),
            source,
        })
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugin_types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    struct Fixed;

    impl Listener for Fixed {}

    #[derive(Deserialize, Default)]
    #[serde(default, deny_unknown_fields)]
    struct FixedConfig {
        #[allow(dead_code)]
        level: u8,
    }

    fn spec(plugin: &str, config: serde_json::Value) -> ListenerSpec {
        ListenerSpec {
            config,
            ..ListenerSpec::new(plugin)
        }
    }

    #[test]
    fn test_builtins() {
        let registry = PluginRegistry::with_builtins();
        assert!(registry.contains("help"));
        assert!(registry.instantiate(&ListenerSpec::new("help"), "root").is_ok());
    }

    #[test]
    fn test_register_config_defaults_and_errors() {
        let mut registry = PluginRegistry::new();
        registry.register_config("fixed", |_: FixedConfig| Fixed);

        assert!(registry.instantiate(&spec("fixed", json!(null)), "root").is_ok());
        assert!(registry.instantiate(&spec("fixed", json!({ "level": 3 })), "root").is_ok());

        let err = registry
            .instantiate(&spec("fixed", json!({ "colour": "red" })), "root")
            .err();
        assert!(matches!(err, Some(ConfigError::Plugin { .. })));
    }

    #[test]
    fn test_unit_config_accepts_empty_table() {
        let mut registry = PluginRegistry::new();
        registry.register_config("unit", |(): ()| Fixed);
        assert!(registry.instantiate(&spec("unit", json!(null)), "root").is_ok());
        assert!(registry.instantiate(&spec("unit", json!({})), "root").is_ok());
    }
}
