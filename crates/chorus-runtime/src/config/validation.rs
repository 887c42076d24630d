//! Configuration validation utilities.
//!
//! Checks what serde cannot: value ranges, cross-field requirements and
//! selector sanity. The scope tree itself is validated when it is loaded
//! against a plugin registry.

use chorus_framework::AdminList;

use super::error::{ConfigError, ConfigResult};
use super::schema::{ChorusConfig, DispatchConfig, LogOutput, LoggingConfig, RuntimeConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &ChorusConfig) -> ConfigResult<()> {
    validate_logging(&config.logging)?;
    validate_runtime(&config.runtime)?;
    validate_dispatch(config)?;
    AdminList::new(config.admins.clone())?;

    if config.resources.pool_size == 0 {
        return Err(ConfigError::validation(
            "resources.pool_size must be greater than 0",
        ));
    }
    if config.resources.database_url.as_deref().is_some_and(str::is_empty) {
        return Err(ConfigError::validation(
            "resources.database_url cannot be empty; leave it unset to disable SQL",
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    if let Some(module) = logging.filters.keys().find(|m| m.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "logging.filters contains an empty module name: '{module}'"
        )));
    }
    Ok(())
}

fn validate_runtime(runtime: &RuntimeConfig) -> ConfigResult<()> {
    if runtime.workers == 0 {
        return Err(ConfigError::validation("runtime.workers must be greater than 0"));
    }
    if runtime.queue_capacity == 0 {
        return Err(ConfigError::validation(
            "runtime.queue_capacity must be greater than 0",
        ));
    }
    if runtime.reconcile_interval_secs == 0 {
        return Err(ConfigError::validation(
            "runtime.reconcile_interval_secs must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_dispatch(config: &ChorusConfig) -> ConfigResult<()> {
    let DispatchConfig {
        prefix,
        require_prefix,
        ..
    } = &config.dispatch;
    validate_prefix("dispatch", prefix, *require_prefix)?;

    for (network, overrides) in &config.networks {
        if network.trim().is_empty() || network.contains(char::is_whitespace) {
            return Err(ConfigError::validation(format!(
                "Invalid network identifier: '{network}'"
            )));
        }
        let prefix = overrides.prefix.as_deref().unwrap_or(prefix);
        let required = overrides.require_prefix.unwrap_or(*require_prefix);
        validate_prefix(&format!("networks.{network}"), prefix, required)?;
    }
    Ok(())
}

fn validate_prefix(section: &str, prefix: &str, required: bool) -> ConfigResult<()> {
    if prefix.chars().any(char::is_whitespace) {
        return Err(ConfigError::validation(format!(
            "{section}.prefix cannot contain whitespace"
        )));
    }
    if required && prefix.is_empty() {
        return Err(ConfigError::validation(format!(
            "{section}.prefix cannot be empty while the prefix is required"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::NetworkConfig;
    use chorus_framework::Selector;

    #[test]
    fn test_default_config_is_valid() {
        validate_config(&ChorusConfig::default()).unwrap();
    }

    #[test]
    fn test_runtime_ranges() {
        let mut config = ChorusConfig::default();
        config.runtime.workers = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));

        let mut config = ChorusConfig::default();
        config.runtime.reconcile_interval_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_file_output_needs_path() {
        let mut config = ChorusConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { field }) if field == "logging.file_path"
        ));
        config.logging.file_path = Some("chorus.log".into());
        validate_config(&config).unwrap();
    }

    #[test]
    fn test_prefix_rules() {
        let mut config = ChorusConfig::default();
        config.dispatch.prefix = String::new();
        assert!(validate_config(&config).is_err());
        config.dispatch.require_prefix = false;
        validate_config(&config).unwrap();

        // a network inherits `require_prefix = false` but sets its own prefix
        config.networks.insert(
            "discord".into(),
            NetworkConfig {
                prefix: Some("! ".into()),
                require_prefix: None,
            },
        );
        assert!(validate_config(&config).is_err());

        config.networks.insert(
            "discord".into(),
            NetworkConfig {
                prefix: None,
                require_prefix: Some(true),
            },
        );
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_admins_must_name_a_user() {
        let mut config = ChorusConfig::default();
        config.admins.push(Selector {
            network: Some("libera".into()),
            ..Selector::default()
        });
        assert!(matches!(validate_config(&config), Err(ConfigError::Scope(_))));
    }
}
