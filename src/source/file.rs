//! Candidate source reading a JSON array of records from disk.

use super::{CandidateFilter, CandidateSource};
use crate::core::error::{AppError, Result, SourceError};
use crate::core::models::CandidateRecord;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::path::Path;

/// Serves pages out of an in-memory record list.
///
/// The list is shuffled once at load time (when enabled), so paging with an
/// advancing offset never repeats a row within a run.
#[derive(Debug, Clone)]
pub struct FileSource {
    label: String,
    records: Vec<CandidateRecord>,
}

impl FileSource {
    pub async fn load(path: impl AsRef<Path>, shuffle: bool) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::Initialization(format!(
                "Failed to read candidate file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let records: Vec<CandidateRecord> = serde_json::from_str(&content)?;
        tracing::info!(target: "source", "Loaded {} candidate records from {}", records.len(), path.display());
        Ok(Self::from_records(path.display().to_string(), records, shuffle))
    }

    pub fn from_records(label: impl Into<String>, mut records: Vec<CandidateRecord>, shuffle: bool) -> Self {
        if shuffle {
            records.shuffle(&mut rand::thread_rng());
        }
        Self {
            label: label.into(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CandidateSource for FileSource {
    async fn fetch_page(
        &self,
        filter: &CandidateFilter,
        limit: usize,
        offset: usize,
    ) -> std::result::Result<Vec<CandidateRecord>, SourceError> {
        let page: Vec<CandidateRecord> = self
            .records
            .iter()
            .filter(|r| r.first_name.as_deref().is_some_and(|n| !n.trim().is_empty()))
            .filter(|r| filter.matches(r))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        tracing::debug!(target: "source", "{}: served {} records at offset {}", self.label, page.len(), offset);
        Ok(page)
    }

    fn name(&self) -> &str {
        &self.label
    }
}
