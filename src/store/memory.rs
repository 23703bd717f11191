//! In-process `LeadStore` used for dry runs and tests.

use super::{ledger_records, sort_counts, LeadStore, StoreResult};
use crate::core::models::{
    AcceptedLead, ListStats, SuppressionSource, SuppressionStats, VerificationRecord,
};

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Tables {
    leads: BTreeMap<String, AcceptedLead>,
    suppression: HashMap<String, SuppressionSource>,
    verifications: HashMap<String, VerificationRecord>,
}

/// Keeps every table in maps keyed by email behind one lock.
#[derive(Debug, Clone, Default)]
pub struct MemoryLeadStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all stored leads, ordered by email.
    pub fn leads(&self) -> Vec<AcceptedLead> {
        self.tables.read().leads.values().cloned().collect()
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn existing_emails(&self, emails: &[String]) -> StoreResult<HashSet<String>> {
        let tables = self.tables.read();
        Ok(emails
            .iter()
            .filter(|e| tables.leads.contains_key(e.as_str()))
            .cloned()
            .collect())
    }

    async fn suppressed_emails(&self, emails: &[String]) -> StoreResult<HashSet<String>> {
        let tables = self.tables.read();
        Ok(emails
            .iter()
            .filter(|e| tables.suppression.contains_key(e.as_str()))
            .cloned()
            .collect())
    }

    async fn cached_statuses(
        &self,
        emails: &[String],
    ) -> StoreResult<HashMap<String, VerificationRecord>> {
        let tables = self.tables.read();
        Ok(emails
            .iter()
            .filter_map(|e| {
                tables
                    .verifications
                    .get(e.as_str())
                    .map(|r| (e.clone(), r.clone()))
            })
            .collect())
    }

    async fn record_verifications(&self, records: &[VerificationRecord]) -> StoreResult<()> {
        let mut tables = self.tables.write();
        for record in records {
            tables
                .verifications
                .insert(record.email.clone(), record.clone());
        }
        Ok(())
    }

    async fn insert_leads(&self, leads: &[AcceptedLead]) -> StoreResult<usize> {
        let mut tables = self.tables.write();
        let mut inserted = 0;
        for lead in leads {
            if tables.leads.contains_key(&lead.email) {
                continue;
            }
            tables.leads.insert(lead.email.clone(), lead.clone());
            inserted += 1;
        }
        for record in ledger_records(leads) {
            tables.verifications.insert(record.email.clone(), record);
        }
        Ok(inserted)
    }

    async fn add_suppressions(
        &self,
        emails: &[String],
        source: SuppressionSource,
    ) -> StoreResult<usize> {
        let mut tables = self.tables.write();
        let mut added = 0;
        for email in emails {
            if !tables.suppression.contains_key(email) {
                tables.suppression.insert(email.clone(), source);
                added += 1;
            }
        }
        Ok(added)
    }

    async fn all_lead_emails(&self) -> StoreResult<Vec<String>> {
        Ok(self.tables.read().leads.keys().cloned().collect())
    }

    async fn suppression_stats(&self) -> StoreResult<SuppressionStats> {
        let tables = self.tables.read();
        let mut per_source: HashMap<&'static str, u64> = HashMap::new();
        for source in tables.suppression.values() {
            *per_source.entry(source.as_str()).or_insert(0) += 1;
        }
        let mut by_source: Vec<(String, u64)> = per_source
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        sort_counts(&mut by_source);
        Ok(SuppressionStats {
            total: tables.suppression.len() as u64,
            by_source,
        })
    }

    async fn clear_suppressions(&self) -> StoreResult<u64> {
        let mut tables = self.tables.write();
        let removed = tables.suppression.len() as u64;
        tables.suppression.clear();
        Ok(removed)
    }

    async fn list_stats(&self) -> StoreResult<Vec<ListStats>> {
        let tables = self.tables.read();
        let mut per_tag: HashMap<&str, u64> = HashMap::new();
        for lead in tables.leads.values() {
            *per_tag.entry(lead.list_tag.as_str()).or_insert(0) += 1;
        }
        let mut counts: Vec<(String, u64)> = per_tag
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        sort_counts(&mut counts);
        Ok(counts
            .into_iter()
            .map(|(list_tag, total)| ListStats { list_tag, total })
            .collect())
    }

    async fn lead_count(&self) -> StoreResult<u64> {
        Ok(self.tables.read().leads.len() as u64)
    }
}
