//! Provides the `ConfigBuilder` for fluent configuration construction.

use super::loading::{apply_file_config, load_config_file};
use super::validation::validate_config;
use super::{Config, ConfigFile, Result, SourceKind};
use crate::AppError;
use std::path::Path;
use std::time::Duration;

/// Builder pattern for creating `Config` instances fluently.
///
/// This is the primary way callers should create a `Config` object.
/// It handles loading from files, applying overrides, and validation.
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
    config_file_path: Option<String>,
    overrides: ConfigFile,
    // Kept as `Duration` since the file format only has whole seconds.
    source_timeout: Option<Duration>,
    verify_timeout: Option<Duration>,
}

impl ConfigBuilder {
    /// Creates a new builder with default configuration values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Specify an optional configuration file path to load.
    pub fn config_file(mut self, path: impl Into<String>) -> Self {
        self.config_file_path = Some(path.into());
        self
    }

    pub fn source_kind(mut self, kind: SourceKind) -> Self {
        self.overrides.source.kind = Some(kind);
        self
    }
    pub fn project_id(mut self, value: impl Into<String>) -> Self {
        self.overrides.source.project_id = Some(value.into());
        self
    }
    pub fn query_template(mut self, value: impl Into<String>) -> Self {
        self.overrides.source.query_template = Some(value.into());
        self
    }
    pub fn access_token(mut self, value: impl Into<String>) -> Self {
        self.overrides.source.access_token = Some(value.into());
        self
    }
    pub fn credentials_json(mut self, value: impl Into<String>) -> Self {
        self.overrides.source.credentials_json = Some(value.into());
        self
    }
    pub fn credentials_file(mut self, path: impl Into<String>) -> Self {
        self.overrides.source.credentials_file = Some(path.into());
        self
    }
    pub fn source_file(mut self, path: impl Into<String>) -> Self {
        self.overrides.source.file_path = Some(path.into());
        self
    }
    pub fn shuffle_file_source(mut self, shuffle: bool) -> Self {
        self.overrides.source.shuffle = Some(shuffle);
        self
    }
    pub fn enabled_sources(mut self, sources: Vec<String>) -> Self {
        self.overrides.source.enabled_sources = Some(sources);
        self
    }
    pub fn source_timeout(mut self, duration: Duration) -> Self {
        self.source_timeout = Some(duration);
        self
    }
    pub fn verifier_api_key(mut self, value: impl Into<String>) -> Self {
        self.overrides.verification.api_key = Some(value.into());
        self
    }
    pub fn verifier_base_url(mut self, value: impl Into<String>) -> Self {
        self.overrides.verification.base_url = Some(value.into());
        self
    }
    pub fn acceptable_statuses(mut self, statuses: Vec<String>) -> Self {
        self.overrides.verification.acceptable_statuses = Some(statuses);
        self
    }
    pub fn verify_sub_batch_size(mut self, value: usize) -> Self {
        self.overrides.verification.sub_batch_size = Some(value);
        self
    }
    pub fn verify_timeout(mut self, duration: Duration) -> Self {
        self.verify_timeout = Some(duration);
        self
    }
    pub fn oversample_factor(mut self, value: f64) -> Self {
        self.overrides.pipeline.oversample_factor = Some(value);
        self
    }
    pub fn batch_bounds(self, min: usize, max: usize) -> Self {
        self.min_batch(min).max_batch(max)
    }
    pub fn min_batch(mut self, value: usize) -> Self {
        self.overrides.pipeline.min_batch = Some(value);
        self
    }
    pub fn max_batch(mut self, value: usize) -> Self {
        self.overrides.pipeline.max_batch = Some(value);
        self
    }
    pub fn safety_multiplier(mut self, value: usize) -> Self {
        self.overrides.pipeline.safety_multiplier = Some(value);
        self
    }
    pub fn persist_chunk_size(mut self, value: usize) -> Self {
        self.overrides.pipeline.persist_chunk_size = Some(value);
        self
    }
    pub fn names_file(mut self, path: impl Into<String>) -> Self {
        self.overrides.pipeline.names_file = Some(path.into());
        self
    }
    /// An empty path disables the audit sample.
    pub fn audit_sample_dir(mut self, path: impl Into<String>) -> Self {
        self.overrides.store.audit_sample_dir = Some(path.into());
        self
    }
    pub fn database_path(mut self, path: impl Into<String>) -> Self {
        self.overrides.store.database_path = Some(path.into());
        self
    }

    /// Builds the final `Config` object, applying defaults, file settings, overrides, and validation.
    pub fn build(mut self) -> Result<Config> {
        let mut loaded_path: Option<String> = None;

        if let Some(ref path) = self.config_file_path {
            match load_config_file(path) {
                Ok(file_config) => {
                    apply_file_config(&mut self.config, &file_config);
                    loaded_path = Some(path.clone());
                    tracing::info!(target: "config", "Loaded base configuration from specified file: {}", path);
                }
                Err(e) => {
                    tracing::error!(target: "config", "Failed to load specified config file '{}': {}", path, e);
                    return Err(AppError::Config(format!(
                        "Failed to load specified configuration file '{}': {}",
                        path, e
                    )));
                }
            }
        } else {
            tracing::debug!(target: "config", "No config file specified, checking default locations.");
            for path_str in ["./lead-sieve.toml", "./config.toml"] {
                if Path::new(path_str).exists() {
                    match load_config_file(path_str) {
                        Ok(file_config) => {
                            apply_file_config(&mut self.config, &file_config);
                            loaded_path = Some(path_str.to_string());
                            tracing::info!(target: "config",
                                "Loaded base configuration from default location: {}",
                                path_str
                            );
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(target: "config",
                                "Failed to load or parse default config '{}': {}",
                                path_str,
                                e
                            );
                        }
                    }
                }
            }
            if loaded_path.is_none() {
                tracing::info!(target: "config", "No configuration file found. Using default values and overrides.");
            }
        }

        apply_file_config(&mut self.config, &self.overrides);
        if let Some(timeout) = self.source_timeout {
            self.config.source_timeout = timeout;
        }
        if let Some(timeout) = self.verify_timeout {
            self.config.verify_timeout = timeout;
        }
        self.config.loaded_config_path = loaded_path;
        validate_config(&mut self.config)?;

        tracing::debug!(target: "config", "Final configuration built successfully.");
        Ok(self.config)
    }
}
