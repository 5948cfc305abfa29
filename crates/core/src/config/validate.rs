use std::collections::HashSet;

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Staging root and chunk sizes are usable
/// - Synchronous staging waits at least once
/// - Applications reference a configured infrastructure
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.staging.root.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "staging.root cannot be empty".to_string(),
        ));
    }

    if config.staging.staged_chunk_size == 0 || config.staging.catalog_chunk_size == 0 {
        return Err(ConfigError::ValidationError(
            "staging chunk sizes must be greater than 0".to_string(),
        ));
    }

    if config.staging.sync_wait_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "staging.sync_wait_attempts must be at least 1".to_string(),
        ));
    }

    let infrastructures: HashSet<&str> = config
        .registry
        .infrastructures
        .iter()
        .map(|i| i.name.as_str())
        .collect();

    for app in &config.registry.applications {
        if !infrastructures.contains(app.infrastructure.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "application '{}' references unknown infrastructure '{}'",
                app.name, app.infrastructure
            )));
        }
    }

    Ok(())
}
