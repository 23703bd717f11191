//! Drops candidates already seen this run, already stored, or suppressed.

use crate::core::error::StoreError;
use crate::core::models::NormalizedCandidate;
use crate::store::LeadStore;

use std::collections::HashSet;
use std::sync::Arc;

/// Candidates that survived deduplication, plus what was dropped.
#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub fresh: Vec<NormalizedCandidate>,
    pub duplicates: u64,
    pub suppressed: u64,
}

/// Per-run deduplicator. The seen-set lives exactly as long as one run.
pub struct Deduplicator {
    store: Arc<dyn LeadStore>,
    seen: HashSet<String>,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn LeadStore>) -> Self {
        Self {
            store,
            seen: HashSet::new(),
        }
    }

    /// Filters one batch.
    ///
    /// Repeats within the run are dropped first. The remaining emails are
    /// checked against stored leads and the suppression set in one batched
    /// lookup each; a suppressed email counts only as suppressed even if it
    /// is also stored.
    pub async fn filter_batch(
        &mut self,
        candidates: Vec<NormalizedCandidate>,
    ) -> Result<DedupOutcome, StoreError> {
        let mut outcome = DedupOutcome::default();
        let mut unseen = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if self.seen.insert(candidate.email.clone()) {
                unseen.push(candidate);
            } else {
                outcome.duplicates += 1;
            }
        }
        if unseen.is_empty() {
            return Ok(outcome);
        }

        let emails: Vec<String> = unseen.iter().map(|c| c.email.clone()).collect();
        let (existing, suppressed) = tokio::join!(
            self.store.existing_emails(&emails),
            self.store.suppressed_emails(&emails)
        );
        let (existing, suppressed) = (existing?, suppressed?);

        for candidate in unseen {
            if suppressed.contains(&candidate.email) {
                outcome.suppressed += 1;
            } else if existing.contains(&candidate.email) {
                outcome.duplicates += 1;
            } else {
                outcome.fresh.push(candidate);
            }
        }
        tracing::debug!(target: "pipeline", "Dedup: {} fresh, {} duplicates, {} suppressed",
            outcome.fresh.len(), outcome.duplicates, outcome.suppressed);
        Ok(outcome)
    }
}
