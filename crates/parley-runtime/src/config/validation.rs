//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogOutput, LoggingConfig, ParleyConfig, StorageConfig, StorageKind};

/// Validates the entire configuration.
pub fn validate_config(config: &ParleyConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_storage_config(&config.storage)?;

    if config.engine.max_steps_per_turn == 0 {
        return Err(ConfigError::validation(
            "engine.max_steps_per_turn must be greater than 0",
        ));
    }

    if !config.settings.is_object() {
        return Err(ConfigError::validation("settings must be a table"));
    }

    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    if logging.max_files == 0 {
        return Err(ConfigError::validation(
            "logging.max_files must be greater than 0",
        ));
    }
    if let Some(target) = logging.filters.keys().find(|t| t.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Invalid log filter target: {target:?}"
        )));
    }
    Ok(())
}

fn validate_storage_config(storage: &StorageConfig) -> ConfigResult<()> {
    match (storage.kind, &storage.path) {
        (StorageKind::File, None) => Err(ConfigError::missing_field("storage.path")),
        (StorageKind::File, Some(path)) if path.as_os_str().is_empty() => {
            Err(ConfigError::validation("storage.path cannot be empty"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&ParleyConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_zero_step_limit() {
        let mut config = ParleyConfig::default();
        config.engine.max_steps_per_turn = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_validate_file_storage_needs_path() {
        let mut config = ParleyConfig::default();
        config.storage.kind = StorageKind::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { ref field }) if field == "storage.path"
        ));

        config.storage.path = Some("./state".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_file_logging_needs_path() {
        let mut config = ParleyConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_settings_must_be_table() {
        let config = ParleyConfig {
            settings: json!([1, 2]),
            ..ParleyConfig::default()
        };
        assert!(validate_config(&config).is_err());
    }
}
