//! Persistence of accepted leads, the suppression set, and the verification ledger.

pub mod memory;
pub mod sqlite;

use crate::core::error::StoreError;
use crate::core::models::{
    AcceptedLead, ListStats, SuppressionSource, SuppressionStats, VerificationRecord,
};

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

pub use memory::MemoryLeadStore;
pub use sqlite::SqliteLeadStore;

pub(crate) type StoreResult<T> = std::result::Result<T, StoreError>;

/// Everything the pipeline and the suppression tooling need from storage.
///
/// Implementations keep at most one lead per email. `insert_leads` must be
/// idempotent: re-inserting an email that is already stored is a no-op and
/// does not count as inserted.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Subset of `emails` already stored as leads under any list tag.
    async fn existing_emails(&self, emails: &[String]) -> StoreResult<HashSet<String>>;

    /// Subset of `emails` present in the suppression set.
    async fn suppressed_emails(&self, emails: &[String]) -> StoreResult<HashSet<String>>;

    /// Previously recorded verification results for any of `emails`.
    async fn cached_statuses(
        &self,
        emails: &[String],
    ) -> StoreResult<HashMap<String, VerificationRecord>>;

    /// Remembers verification results; later records for an email replace earlier ones.
    async fn record_verifications(&self, records: &[VerificationRecord]) -> StoreResult<()>;

    /// Inserts leads, skipping emails already stored. Returns the number inserted.
    async fn insert_leads(&self, leads: &[AcceptedLead]) -> StoreResult<usize>;

    /// Adds emails to the suppression set. Returns the number newly added.
    async fn add_suppressions(
        &self,
        emails: &[String],
        source: SuppressionSource,
    ) -> StoreResult<usize>;

    async fn all_lead_emails(&self) -> StoreResult<Vec<String>>;

    async fn suppression_stats(&self) -> StoreResult<SuppressionStats>;

    /// Empties the suppression set. Returns the number of removed entries.
    async fn clear_suppressions(&self) -> StoreResult<u64>;

    /// Lead counts per list tag, largest first.
    async fn list_stats(&self) -> StoreResult<Vec<ListStats>>;

    async fn lead_count(&self) -> StoreResult<u64>;
}

/// Ledger entries implied by a set of accepted leads.
pub(crate) fn ledger_records(leads: &[AcceptedLead]) -> Vec<VerificationRecord> {
    leads
        .iter()
        .filter_map(|lead| {
            lead.verified_at.map(|verified_at| VerificationRecord {
                email: lead.email.clone(),
                status: lead.verified_status,
                verified_at,
            })
        })
        .collect()
}

/// Sorts `(key, count)` pairs by descending count, then key.
pub(crate) fn sort_counts(counts: &mut [(String, u64)]) {
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
}
