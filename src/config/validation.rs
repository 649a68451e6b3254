use crate::acquisition::{VideoFormat, VideoQuality};
use crate::config::types::{
    AttachmentConfig, BrowserConfig, Config, StorageConfig, SupervisorConfig, VideoConfig,
};
use crate::ConfigError;

/// Upper bound for any acquisition concurrency setting
const MAX_CONCURRENCY: usize = 64;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_supervisor_config(&config.supervisor)?;
    validate_storage_config(&config.storage)?;
    validate_browser_config(&config.browser)?;
    validate_attachment_config(&config.attachments)?;
    validate_video_config(&config.videos)?;
    Ok(())
}

/// Validates supervisor configuration
fn validate_supervisor_config(config: &SupervisorConfig) -> Result<(), ConfigError> {
    if config.outputs_root.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "outputs_root cannot be empty".to_string(),
        ));
    }

    if config.selectors_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "selectors_path cannot be empty".to_string(),
        ));
    }

    if let Some(command) = &config.extractor_command {
        if command.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "extractor_command cannot be empty when set".to_string(),
            ));
        }
    }

    if config.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "poll_interval_ms must be > 0".to_string(),
        ));
    }

    if config.run_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "run_timeout_ms must be > 0".to_string(),
        ));
    }

    if config.cancel_check_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "cancel_check_interval_ms must be > 0".to_string(),
        ));
    }

    if config.output_tail_lines == 0 {
        return Err(ConfigError::Validation(
            "output_tail_lines must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_browser_config(config: &BrowserConfig) -> Result<(), ConfigError> {
    if config.navigation_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "navigation_timeout_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

/// Validates attachment acquisition limits
fn validate_attachment_config(config: &AttachmentConfig) -> Result<(), ConfigError> {
    validate_concurrency("attachments.max_concurrent", config.max_concurrent)?;
    validate_transfer_limits(
        "attachments",
        config.timeout_ms,
        config.max_retries,
        config.max_size_bytes,
    )
}

/// Validates video acquisition limits and enumerated options
fn validate_video_config(config: &VideoConfig) -> Result<(), ConfigError> {
    validate_concurrency("videos.max_concurrent", config.max_concurrent)?;
    validate_transfer_limits(
        "videos",
        config.timeout_ms,
        config.max_retries,
        config.max_size_bytes,
    )?;

    if config.tool_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "videos.tool_path cannot be empty".to_string(),
        ));
    }

    config
        .quality
        .parse::<VideoQuality>()
        .map_err(ConfigError::Validation)?;
    config
        .format
        .parse::<VideoFormat>()
        .map_err(ConfigError::Validation)?;

    Ok(())
}

fn validate_concurrency(name: &str, value: usize) -> Result<(), ConfigError> {
    if value < 1 || value > MAX_CONCURRENCY {
        return Err(ConfigError::Validation(format!(
            "{} must be between 1 and {}, got {}",
            name, MAX_CONCURRENCY, value
        )));
    }
    Ok(())
}

fn validate_transfer_limits(
    section: &str,
    timeout_ms: u64,
    max_retries: u32,
    max_size_bytes: u64,
) -> Result<(), ConfigError> {
    if timeout_ms == 0 {
        return Err(ConfigError::Validation(format!(
            "{}.timeout_ms must be > 0",
            section
        )));
    }

    if max_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "{}.max_retries must be >= 1, got {}",
            section, max_retries
        )));
    }

    if max_size_bytes == 0 {
        return Err(ConfigError::Validation(format!(
            "{}.max_size_bytes must be > 0",
            section
        )));
    }

    Ok(())
}
