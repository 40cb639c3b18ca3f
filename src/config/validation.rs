use crate::config::types::{Config, OutputConfig, PipelineConfig};
use crate::ConfigError;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_pipeline_config(&config.pipeline)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates pipeline tuning
pub fn validate_pipeline_config(config: &PipelineConfig) -> Result<(), ConfigError> {
    if config.max_batch_size < 1 || config.max_batch_size > 10_000 {
        return Err(ConfigError::Validation(format!(
            "max_batch_size must be between 1 and 10000, got {}",
            config.max_batch_size
        )));
    }

    if config.flush_interval_ms < 10 {
        return Err(ConfigError::Validation(format!(
            "flush_interval_ms must be >= 10ms, got {}ms",
            config.flush_interval_ms
        )));
    }

    if config.drain_grace_period_ms > 600_000 {
        return Err(ConfigError::Validation(format!(
            "drain_grace_period_ms must be <= 600000ms, got {}ms",
            config.drain_grace_period_ms
        )));
    }

    if config.uploader_count < 1 || config.uploader_count > 64 {
        return Err(ConfigError::Validation(format!(
            "uploader_count must be between 1 and 64, got {}",
            config.uploader_count
        )));
    }

    for (name, capacity) in [
        ("input_queue_capacity", config.input_queue_capacity),
        ("batch_queue_capacity", config.batch_queue_capacity),
        ("dedup_queue_capacity", config.dedup_queue_capacity),
        ("error_queue_capacity", config.error_queue_capacity),
    ] {
        if capacity < 1 {
            return Err(ConfigError::Validation(format!(
                "{} must be >= 1, got {}",
                name, capacity
            )));
        }
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}
