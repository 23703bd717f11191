//! Runtime configuration: defaults, file representation, and helpers.

mod builder;
mod loading;
mod validation;

pub use builder::ConfigBuilder;

pub(crate) use crate::core::error::Result;
use crate::core::models::VerificationStatus;

use rand::Rng;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which candidate source implementation a run should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Bigquery,
    File,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bigquery" => Ok(SourceKind::Bigquery),
            "file" => Ok(SourceKind::File),
            other => Err(format!("Unknown source kind '{}'", other)),
        }
    }
}

/// A credential that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Effective configuration after defaults, file values and overrides.
#[derive(Debug, Clone)]
pub struct Config {
    // Candidate source
    pub source_kind: SourceKind,
    pub project_id: Option<String>,
    pub query_template: Option<String>,
    pub access_token: Option<Secret>,
    /// Service-account key JSON, used when no access token is given.
    pub credentials_json: Option<Secret>,
    /// Path to a service-account key file.
    pub credentials_file: Option<String>,
    pub source_location: String,
    pub source_file: Option<String>,
    pub shuffle_file_source: bool,
    pub enabled_sources: Vec<String>,
    pub source_timeout: Duration,
    pub source_max_retries: u32,
    pub source_retry_delay: Duration,

    // Verification service
    pub verifier_api_key: Option<Secret>,
    pub verifier_base_url: String,
    pub verifier_mode: String,
    pub acceptable_statuses: BTreeSet<VerificationStatus>,
    pub verify_sub_batch_size: usize,
    pub verify_timeout: Duration,

    // Adaptive loop
    pub oversample_factor: f64,
    pub min_batch: usize,
    pub max_batch: usize,
    pub safety_multiplier: usize,
    pub persist_chunk_size: usize,
    /// Optional `name,gender` CSV extending the bundled first-name table.
    pub names_file: Option<String>,

    // Persistence
    pub database_path: String,
    /// Directory for per-run audit sample CSVs; `None` disables them.
    pub audit_sample_dir: Option<String>,

    pub loaded_config_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_kind: SourceKind::Bigquery,
            project_id: None,
            query_template: None,
            access_token: None,
            credentials_json: None,
            credentials_file: None,
            source_location: "US".to_string(),
            source_file: None,
            shuffle_file_source: true,
            enabled_sources: Vec::new(),
            source_timeout: Duration::from_secs(30),
            source_max_retries: 2,
            source_retry_delay: Duration::from_secs(2),

            verifier_api_key: None,
            verifier_base_url: "https://emailverifier.reoon.com/api/v1/verify".to_string(),
            verifier_mode: "power".to_string(),
            acceptable_statuses: BTreeSet::from([VerificationStatus::Safe]),
            verify_sub_batch_size: 5,
            verify_timeout: Duration::from_secs(30),

            oversample_factor: 5.0,
            min_batch: 100,
            max_batch: 2000,
            safety_multiplier: 20,
            persist_chunk_size: 500,
            names_file: None,

            database_path: "leads.db".to_string(),
            audit_sample_dir: Some("reoon_samples".to_string()),

            loaded_config_path: None,
        }
    }
}

impl Config {
    /// Names of settings a generation run cannot start without.
    pub fn missing_run_settings(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        match self.source_kind {
            SourceKind::Bigquery => {
                if is_blank(&self.project_id) {
                    missing.push("source.project_id");
                }
                if is_blank(&self.query_template) {
                    missing.push("source.query_template");
                }
            }
            SourceKind::File => {
                if is_blank(&self.source_file) {
                    missing.push("source.file_path");
                }
            }
        }
        if self
            .verifier_api_key
            .as_ref()
            .is_none_or(|key| key.expose().trim().is_empty())
        {
            missing.push("verification.api_key");
        }
        missing
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

/// Retry pause for the candidate source with up to 25% random jitter added.
pub(crate) fn get_retry_delay(config: &Config) -> Duration {
    let base = config.source_retry_delay.as_millis() as u64;
    if base == 0 {
        return Duration::ZERO;
    }
    let jitter = rand::thread_rng().gen_range(0..=base / 4);
    Duration::from_millis(base + jitter)
}

/// On-disk configuration. Every field is optional and merged onto defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub source: SourceSection,
    pub verification: VerificationSection,
    pub pipeline: PipelineSection,
    pub store: StoreSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    pub kind: Option<SourceKind>,
    pub project_id: Option<String>,
    pub query_template: Option<String>,
    pub access_token: Option<String>,
    pub credentials_json: Option<String>,
    pub credentials_file: Option<String>,
    pub location: Option<String>,
    pub file_path: Option<String>,
    pub shuffle: Option<bool>,
    pub enabled_sources: Option<Vec<String>>,
    pub request_timeout: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VerificationSection {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub mode: Option<String>,
    pub acceptable_statuses: Option<Vec<String>>,
    pub sub_batch_size: Option<usize>,
    pub request_timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub oversample_factor: Option<f64>,
    pub min_batch: Option<usize>,
    pub max_batch: Option<usize>,
    pub safety_multiplier: Option<usize>,
    pub persist_chunk_size: Option<usize>,
    pub names_file: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub database_path: Option<String>,
    /// Empty string disables the audit sample.
    pub audit_sample_dir: Option<String>,
}
