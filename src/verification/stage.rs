//! Cache lookup and bounded-concurrency verification of deduplicated candidates.

use super::EmailVerifier;
use crate::core::models::{NormalizedCandidate, VerificationRecord, VerificationStatus};
use crate::store::LeadStore;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// The verification result for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationOutcome {
    pub candidate: NormalizedCandidate,
    pub status: VerificationStatus,
    pub verified_at: Option<DateTime<Utc>>,
    pub from_cache: bool,
}

/// Results worth remembering across runs. Call failures are retried next time.
fn is_cacheable(status: VerificationStatus) -> bool {
    !matches!(
        status,
        VerificationStatus::Error | VerificationStatus::Unverified | VerificationStatus::Disabled
    )
}

pub struct VerificationStage {
    verifier: Arc<dyn EmailVerifier>,
    store: Arc<dyn LeadStore>,
    acceptable: BTreeSet<VerificationStatus>,
    sub_batch_size: usize,
    call_timeout: Duration,
}

impl VerificationStage {
    pub fn new(
        verifier: Arc<dyn EmailVerifier>,
        store: Arc<dyn LeadStore>,
        acceptable: BTreeSet<VerificationStatus>,
        sub_batch_size: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            verifier,
            store,
            acceptable,
            sub_batch_size: sub_batch_size.max(1),
            call_timeout,
        }
    }

    pub fn sub_batch_size(&self) -> usize {
        self.sub_batch_size
    }

    pub fn is_acceptable(&self, status: VerificationStatus) -> bool {
        self.acceptable.contains(&status)
    }

    /// Splits candidates into cache hits (resolved without a paid call) and
    /// the rest, preserving input order within each group.
    ///
    /// A failed lookup leaves every candidate uncached.
    pub async fn split_cached(
        &self,
        candidates: Vec<NormalizedCandidate>,
    ) -> (Vec<VerificationOutcome>, Vec<NormalizedCandidate>) {
        if candidates.is_empty() {
            return (Vec::new(), Vec::new());
        }
        let emails: Vec<String> = candidates.iter().map(|c| c.email.clone()).collect();
        let mut cached = match self.store.cached_statuses(&emails).await {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(target: "verification", "Cache lookup failed, verifying all {} candidates: {}", emails.len(), e);
                Default::default()
            }
        };

        let mut hits = Vec::new();
        let mut misses = Vec::new();
        for candidate in candidates {
            match cached.remove(&candidate.email) {
                Some(record) => hits.push(VerificationOutcome {
                    candidate,
                    status: record.status,
                    verified_at: Some(record.verified_at),
                    from_cache: true,
                }),
                None => misses.push(candidate),
            }
        }
        tracing::debug!(target: "verification", "Cache: {} hits, {} misses", hits.len(), misses.len());
        (hits, misses)
    }

    /// Verifies one sub-batch concurrently. Never fails: a call that errors or
    /// times out yields `VerificationStatus::Error` for that email only.
    ///
    /// Fresh cacheable results are written to the verification ledger.
    pub async fn verify_sub_batch(
        &self,
        candidates: Vec<NormalizedCandidate>,
    ) -> Vec<VerificationOutcome> {
        let mut tasks = FuturesUnordered::new();
        for (idx, candidate) in candidates.iter().enumerate() {
            let verifier = Arc::clone(&self.verifier);
            let email = candidate.email.clone();
            let call_timeout = self.call_timeout;
            tasks.push(async move {
                let status = match tokio::time::timeout(call_timeout, verifier.verify(&email)).await {
                    Ok(Ok(status)) => status,
                    Ok(Err(e)) => {
                        tracing::warn!(target: "verification", "[{}] Verification call failed: {}", email, e);
                        VerificationStatus::Error
                    }
                    Err(_) => {
                        tracing::warn!(target: "verification", "[{}] Verification call timed out after {:?}", email, call_timeout);
                        VerificationStatus::Error
                    }
                };
                (idx, status, Utc::now())
            });
        }

        let mut results: Vec<Option<(VerificationStatus, DateTime<Utc>)>> = vec![None; candidates.len()];
        while let Some((idx, status, at)) = tasks.next().await {
            results[idx] = Some((status, at));
        }

        let outcomes: Vec<VerificationOutcome> = candidates
            .into_iter()
            .zip(results)
            .map(|(candidate, result)| {
                let (status, at) = result.unwrap_or((VerificationStatus::Error, Utc::now()));
                VerificationOutcome {
                    candidate,
                    status,
                    verified_at: Some(at),
                    from_cache: false,
                }
            })
            .collect();

        let ledger: Vec<VerificationRecord> = outcomes
            .iter()
            .filter(|o| is_cacheable(o.status))
            .filter_map(|o| {
                o.verified_at.map(|verified_at| VerificationRecord {
                    email: o.candidate.email.clone(),
                    status: o.status,
                    verified_at,
                })
            })
            .collect();
        if let Err(e) = self.store.record_verifications(&ledger).await {
            tracing::warn!(target: "verification", "Could not record {} verification results: {}", ledger.len(), e);
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::VerificationCallError;
    use crate::core::models::Gender;
    use crate::store::MemoryLeadStore;
    use async_trait::async_trait;

    struct ScriptedVerifier;

    #[async_trait]
    impl EmailVerifier for ScriptedVerifier {
        async fn verify(&self, email: &str) -> Result<VerificationStatus, VerificationCallError> {
            if email.starts_with("slow") {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if email.starts_with("boom") {
                return Err(VerificationCallError::Service("quota exceeded".into()));
            }
            if email.starts_with("bad") {
                return Ok(VerificationStatus::Invalid);
            }
            Ok(VerificationStatus::Safe)
        }
    }

    fn candidate(email: &str) -> NormalizedCandidate {
        NormalizedCandidate {
            email: email.to_string(),
            first_name: "Ann".into(),
            last_name: String::new(),
            gender: Gender::Female,
            company: String::new(),
            source: "apollo".into(),
            source_detail: String::new(),
            job_title: String::new(),
            industry: String::new(),
            location: String::new(),
            company_domain: String::new(),
            profile_url: String::new(),
        }
    }

    fn stage(store: Arc<MemoryLeadStore>) -> VerificationStage {
        VerificationStage::new(
            Arc::new(ScriptedVerifier),
            store,
            BTreeSet::from([VerificationStatus::Safe]),
            5,
            Duration::from_millis(200),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_isolated_per_email() {
        let store = Arc::new(MemoryLeadStore::new());
        let stage = stage(Arc::clone(&store));
        let outcomes = stage
            .verify_sub_batch(vec![
                candidate("good@acme.com"),
                candidate("boom@acme.com"),
                candidate("slow@acme.com"),
                candidate("bad@acme.com"),
            ])
            .await;
        let statuses: Vec<VerificationStatus> = outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![
                VerificationStatus::Safe,
                VerificationStatus::Error,
                VerificationStatus::Error,
                VerificationStatus::Invalid,
            ]
        );

        let cached = store
            .cached_statuses(&[
                "good@acme.com".to_string(),
                "boom@acme.com".to_string(),
                "bad@acme.com".to_string(),
            ])
            .await
            .unwrap();
        assert_eq!(cached.len(), 2);
        assert!(!cached.contains_key("boom@acme.com"));
    }

    #[tokio::test]
    async fn test_split_cached_preserves_order() {
        let store = Arc::new(MemoryLeadStore::new());
        store
            .record_verifications(&[VerificationRecord {
                email: "b@acme.com".into(),
                status: VerificationStatus::CatchAll,
                verified_at: Utc::now(),
            }])
            .await
            .unwrap();
        let stage = stage(Arc::clone(&store));
        let (hits, misses) = stage
            .split_cached(vec![candidate("a@acme.com"), candidate("b@acme.com"), candidate("c@acme.com")])
            .await;
        assert_eq!(hits.len(), 1);
        assert!(hits[0].from_cache);
        assert_eq!(hits[0].status, VerificationStatus::CatchAll);
        let missed: Vec<&str> = misses.iter().map(|c| c.email.as_str()).collect();
        assert_eq!(missed, vec!["a@acme.com", "c@acme.com"]);
        assert!(!stage.is_acceptable(VerificationStatus::CatchAll));
    }
}
