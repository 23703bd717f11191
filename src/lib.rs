//! # Lead Sieve Core Library
//!
//! Builds outreach lead lists from a large candidate table: candidates are
//! fetched in adaptively sized pages, cleaned and filtered locally, checked
//! against stored leads and a suppression list, verified through a paid
//! deliverability service (with a cache in front of it), and saved under a
//! list tag.
//!
//! It is designed to be used either directly as a library or via the
//! `lead-sieve` command-line tool.

mod core;
mod source;
mod store;
mod utils;
mod verification;

pub use crate::core::config::{Config, ConfigBuilder, ConfigFile, Secret, SourceKind};
pub use crate::core::error::{
    AppError, Result, SourceError, StoreError, VerificationCallError,
};
pub use crate::core::models::{
    AcceptedLead, CandidateRecord, Gender, GenderFilter, ListStats, NormalizedCandidate,
    RunRequest, SuppressionSource, SuppressionStats, VerificationRecord, VerificationStatus,
};
pub use crate::core::pipeline::{LeadPipeline, PipelineSettings, RunReport};
pub use crate::core::progress::{
    Phase, ProgressEmitter, ProgressEvent, ProgressSnapshot, RunStats, RunSummary,
};
pub use crate::core::run_state::SourceStats;
pub use crate::source::{
    BigQueryAuth, BigQuerySource, CandidateFilter, CandidateSource, FileSource,
};
pub use crate::store::{LeadStore, MemoryLeadStore, SqliteLeadStore};
pub use crate::utils::gender::{GenderClassifier, NameTableClassifier};
pub use crate::utils::prefilter::{FilterRejection, FilterRules};
pub use crate::verification::{EmailVerifier, ReoonVerifier};

pub use tokio_util::sync::CancellationToken;

use std::sync::Arc;

/// Opens the SQLite store named by `config.database_path`.
pub fn open_store(config: &Config) -> Result<Arc<dyn LeadStore>> {
    let store = SqliteLeadStore::open(&config.database_path)?;
    tracing::debug!(target: "store", "Using database {}", config.database_path);
    Ok(Arc::new(store))
}

/// Builds the candidate source selected by `config.source_kind`.
pub async fn build_source(config: &Config) -> Result<Arc<dyn CandidateSource>> {
    match config.source_kind {
        SourceKind::Bigquery => Ok(Arc::new(BigQuerySource::new(config)?)),
        SourceKind::File => {
            let path = config
                .source_file
                .as_deref()
                .ok_or_else(|| AppError::Config("source.file_path is not set".into()))?;
            Ok(Arc::new(
                FileSource::load(path, config.shuffle_file_source).await?,
            ))
        }
    }
}

/// Runs one list-generation request with collaborators built from `config`.
///
/// Missing settings, or a collaborator that cannot be built, end the run with
/// an `error` event before anything is fetched.
pub async fn generate_list(
    config: &Config,
    store: Arc<dyn LeadStore>,
    request: &RunRequest,
    emitter: &ProgressEmitter,
    cancel: &CancellationToken,
) -> Result<RunReport> {
    let missing = config.missing_run_settings();
    if !missing.is_empty() {
        let err = AppError::Config(format!(
            "missing required settings: {}",
            missing.join(", ")
        ));
        tracing::error!(target: "pipeline", "Refusing to start run: {}", err);
        emitter.error(err.to_string());
        return Err(err);
    }

    let collaborators = async {
        let source = build_source(config).await?;
        let verifier: Arc<dyn EmailVerifier> = Arc::new(ReoonVerifier::new(config)?);
        let classifier = match config.names_file {
            Some(ref path) => NameTableClassifier::bundled_with_file(path)?,
            None => NameTableClassifier::bundled(),
        };
        Ok::<_, AppError>((source, verifier, classifier))
    }
    .await;
    let (source, verifier, classifier) = match collaborators {
        Ok(parts) => parts,
        Err(e) => {
            tracing::error!(target: "pipeline", "Could not initialize run: {}", e);
            emitter.error(e.to_string());
            return Err(e);
        }
    };

    LeadPipeline::new(config, source, verifier, store)
        .with_classifier(Arc::new(classifier))
        .run(request, emitter, cancel)
        .await
}

/// Extracts addresses from an uploaded suppression file.
///
/// Accepts one address per line, comma-separated values, or CSV rows. Tokens
/// are trimmed and lowercased; anything that is not a single-`@` address
/// (header cells included) is skipped. Order is kept, repeats removed.
pub fn parse_suppression_upload(body: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    body.split(['\r', '\n', ','])
        .map(|token| token.trim().trim_matches('"').trim().to_lowercase())
        .filter(|token| {
            let mut parts = token.split('@');
            matches!(
                (parts.next(), parts.next(), parts.next()),
                (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty()
            )
        })
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

/// Outcome of a suppression upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuppressionUpload {
    pub emails_in_file: usize,
    pub newly_added: usize,
    pub total: u64,
}

/// Parses `body` and adds every address to the suppression set as `uploaded`.
pub async fn upload_suppressions(store: &dyn LeadStore, body: &str) -> Result<SuppressionUpload> {
    let emails = parse_suppression_upload(body);
    if emails.is_empty() {
        return Err(AppError::InvalidRequest(
            "no valid email addresses found in the upload".into(),
        ));
    }
    let newly_added = store
        .add_suppressions(&emails, SuppressionSource::Uploaded)
        .await?;
    let total = store.suppression_stats().await?.total;
    tracing::info!(target: "store", "Suppression upload: {} new of {} in file ({} total)",
        newly_added, emails.len(), total);
    Ok(SuppressionUpload {
        emails_in_file: emails.len(),
        newly_added,
        total,
    })
}

/// Copies every stored lead email into the suppression set as `synced-from-leads`.
/// Returns the number of newly suppressed addresses.
pub async fn sync_suppressions_from_leads(store: &dyn LeadStore) -> Result<usize> {
    let emails = store.all_lead_emails().await?;
    let added = store
        .add_suppressions(&emails, SuppressionSource::SyncedFromLeads)
        .await?;
    tracing::info!(target: "store", "Suppression sync: {} new of {} lead emails", added, emails.len());
    Ok(added)
}
