//! Handles loading configuration from files and applying it to the Config struct.

use super::{Config, ConfigFile, Secret};
use crate::core::models::VerificationStatus;
use anyhow::Context;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Loads configuration settings from a TOML file.
/// Returns the parsed `ConfigFile` content.
pub(crate) fn load_config_file(file_path: &str) -> anyhow::Result<ConfigFile> {
    let path = Path::new(file_path);
    if !path.exists() || !path.is_file() {
        return Err(anyhow::anyhow!(
            "File not found or is not a file: {}",
            file_path
        ));
    }
    tracing::debug!(target: "config", "Attempting to read config file: {}", file_path);
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", file_path))?;

    let config_file_content: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse TOML configuration from {}", file_path))?;

    tracing::debug!(target: "config", "Successfully parsed configuration file: {}", file_path);
    Ok(config_file_content)
}

/// Applies settings from a parsed `ConfigFile` onto a mutable `Config` instance.
/// Values present in the file win; absent values leave the config untouched.
pub(crate) fn apply_file_config(config: &mut Config, file_config: &ConfigFile) {
    // Source
    let source = &file_config.source;
    if let Some(kind) = source.kind {
        config.source_kind = kind;
    }
    if let Some(ref project_id) = source.project_id {
        config.project_id = non_empty(project_id);
    }
    if let Some(ref template) = source.query_template {
        config.query_template = non_empty(template);
    }
    if let Some(ref token) = source.access_token {
        config.access_token = non_empty(token).map(Secret::new);
    }
    if let Some(ref json) = source.credentials_json {
        config.credentials_json = non_empty(json).map(Secret::new);
    }
    if let Some(ref path) = source.credentials_file {
        config.credentials_file = non_empty(path);
    }
    if let Some(ref location) = source.location {
        if !location.trim().is_empty() {
            config.source_location = location.trim().to_string();
        }
    }
    if let Some(ref path) = source.file_path {
        config.source_file = non_empty(path);
    }
    if let Some(shuffle) = source.shuffle {
        config.shuffle_file_source = shuffle;
    }
    if let Some(ref sources) = source.enabled_sources {
        config.enabled_sources = sources
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Some(timeout) = source.request_timeout {
        config.source_timeout = Duration::from_secs(timeout);
    }
    if let Some(retries) = source.max_retries {
        config.source_max_retries = retries;
    }
    if let Some(delay) = source.retry_delay {
        config.source_retry_delay = Duration::from_secs(delay);
    }

    // Verification
    let verification = &file_config.verification;
    if let Some(ref key) = verification.api_key {
        config.verifier_api_key = non_empty(key).map(Secret::new);
    }
    if let Some(ref url) = verification.base_url {
        if !url.trim().is_empty() {
            config.verifier_base_url = url.trim().to_string();
        }
    }
    if let Some(ref mode) = verification.mode {
        if !mode.trim().is_empty() {
            config.verifier_mode = mode.trim().to_string();
        }
    }
    if let Some(ref statuses) = verification.acceptable_statuses {
        let mut parsed = std::collections::BTreeSet::new();
        for raw in statuses {
            match raw.parse::<VerificationStatus>() {
                Ok(status) => {
                    parsed.insert(status);
                }
                Err(e) => {
                    tracing::warn!(target: "config", "Ignoring acceptable status: {}", e);
                }
            }
        }
        config.acceptable_statuses = parsed;
    }
    if let Some(size) = verification.sub_batch_size {
        config.verify_sub_batch_size = size;
    }
    if let Some(timeout) = verification.request_timeout {
        config.verify_timeout = Duration::from_secs(timeout);
    }

    // Pipeline
    let pipeline = &file_config.pipeline;
    if let Some(factor) = pipeline.oversample_factor {
        config.oversample_factor = factor;
    }
    if let Some(min) = pipeline.min_batch {
        config.min_batch = min;
    }
    if let Some(max) = pipeline.max_batch {
        config.max_batch = max;
    }
    if let Some(multiplier) = pipeline.safety_multiplier {
        config.safety_multiplier = multiplier;
    }
    if let Some(chunk) = pipeline.persist_chunk_size {
        config.persist_chunk_size = chunk;
    }
    if let Some(ref path) = pipeline.names_file {
        config.names_file = non_empty(path);
    }

    // Store
    if let Some(ref path) = file_config.store.database_path {
        if !path.trim().is_empty() {
            config.database_path = path.trim().to_string();
        }
    }
    if let Some(ref dir) = file_config.store.audit_sample_dir {
        config.audit_sample_dir = non_empty(dir);
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
