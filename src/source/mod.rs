//! Candidate sources: where raw prospect rows come from.

pub mod auth;
pub mod bigquery;
pub mod file;
pub mod query;

use crate::core::error::SourceError;
use crate::core::models::CandidateRecord;

use async_trait::async_trait;

pub use auth::BigQueryAuth;
pub use bigquery::BigQuerySource;
pub use file::FileSource;

/// Server-side filter handed to a source with every page request.
///
/// Gender is inferred locally from first names, so sources only ever see the
/// no-op gender marker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateFilter {
    /// Case-insensitive substring match on the industry column.
    pub industry: Option<String>,
    /// Allow-list of source identifiers; empty admits every source.
    pub enabled_sources: Vec<String>,
}

impl CandidateFilter {
    pub fn new(industry: Option<String>, enabled_sources: Vec<String>) -> Self {
        Self {
            industry: industry
                .map(|i| i.trim().to_string())
                .filter(|i| !i.is_empty()),
            enabled_sources,
        }
    }

    /// Applies the filter to one record; used by sources that cannot filter remotely.
    pub fn matches(&self, record: &CandidateRecord) -> bool {
        if let Some(ref needle) = self.industry {
            let haystack = record.industry.as_deref().unwrap_or("").to_lowercase();
            if !haystack.contains(&needle.to_lowercase()) {
                return false;
            }
        }
        if !self.enabled_sources.is_empty() {
            let source = record.source.as_deref().unwrap_or("");
            if !self.enabled_sources.iter().any(|s| s == source) {
                return false;
            }
        }
        true
    }
}

/// A pageable supply of candidate records.
///
/// `fetch_page` returns at most `limit` records starting at `offset`; an
/// empty page means the source is exhausted for this filter.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn fetch_page(
        &self,
        filter: &CandidateFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CandidateRecord>, SourceError>;

    /// Short label for logs.
    fn name(&self) -> &str;
}
