//! Contains validation logic for the final Config struct.

use super::{Config, Result};
use crate::core::error::AppError;

/// Validates the configuration settings after loading and potential overrides.
/// Mutates the config to clamp values where a sane fallback exists; returns
/// `AppError::Config` where none does.
pub(crate) fn validate_config(config: &mut Config) -> Result<()> {
    if !config.oversample_factor.is_finite() || config.oversample_factor <= 0.0 {
        return Err(AppError::Config(format!(
            "Oversample factor must be a positive number, got {}.",
            config.oversample_factor
        )));
    }
    if config.oversample_factor < 1.0 {
        tracing::warn!(target: "config",
            "Oversample factor ({:.2}) < 1.0 cannot compensate for attrition. Setting to 1.0.",
            config.oversample_factor
        );
        config.oversample_factor = 1.0;
    }
    if config.min_batch == 0 {
        tracing::warn!(target: "config", "Minimum batch size was 0. Setting to 1.");
        config.min_batch = 1;
    }
    if config.min_batch > config.max_batch {
        tracing::warn!(target: "config",
            "Min batch ({}) > Max batch ({}). Setting max batch = min batch.",
            config.min_batch,
            config.max_batch
        );
        config.max_batch = config.min_batch;
    }
    if config.safety_multiplier == 0 {
        tracing::warn!(target: "config", "Safety multiplier was 0. Setting to 1.");
        config.safety_multiplier = 1;
    }
    if config.verify_sub_batch_size == 0 {
        tracing::warn!(target: "config", "Verification sub-batch size was 0. Setting to 1.");
        config.verify_sub_batch_size = 1;
    }
    if config.persist_chunk_size == 0 {
        tracing::warn!(target: "config", "Persist chunk size was 0. Setting to 500.");
        config.persist_chunk_size = 500;
    }
    if config.acceptable_statuses.is_empty() {
        return Err(AppError::Config(
            "At least one acceptable verification status is required.".to_string(),
        ));
    }
    if config.source_timeout.is_zero() || config.verify_timeout.is_zero() {
        return Err(AppError::Config(
            "Request timeouts must be greater than zero.".to_string(),
        ));
    }
    if url::Url::parse(&config.verifier_base_url).is_err() {
        return Err(AppError::Config(format!(
            "Invalid verification base URL: {}",
            config.verifier_base_url
        )));
    }
    if config.database_path.trim().is_empty() {
        return Err(AppError::Config("Database path cannot be empty.".to_string()));
    }
    Ok(())
}
