//! End-to-end runs of `LeadPipeline` against scripted collaborators.

use async_trait::async_trait;
use chrono::Utc;
use lead_sieve_core::{
    AcceptedLead, AppError, CancellationToken, CandidateFilter, CandidateRecord, CandidateSource,
    Config, ConfigBuilder, Gender, LeadPipeline, LeadStore, ListStats, MemoryLeadStore,
    ProgressEmitter, ProgressEvent, RunReport, RunRequest, SourceError, StoreError,
    SuppressionSource, SuppressionStats, VerificationCallError, VerificationRecord,
    VerificationStatus, EmailVerifier, Phase,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn record(email: &str, first_name: &str) -> CandidateRecord {
    CandidateRecord {
        email: Some(email.to_string()),
        first_name: Some(first_name.to_string()),
        company: Some("Acme".to_string()),
        source: Some("apollo".to_string()),
        ..CandidateRecord::default()
    }
}

fn people(prefix: &str, count: usize) -> Vec<CandidateRecord> {
    (0..count)
        .map(|i| record(&format!("{}.person{}@acme.io", prefix, i), "Anna"))
        .collect()
}

fn stored_lead(email: &str) -> AcceptedLead {
    AcceptedLead {
        email: email.to_string(),
        first_name: "Old".into(),
        last_name: String::new(),
        gender: Gender::Unknown,
        company: String::new(),
        source: String::new(),
        source_detail: String::new(),
        job_title: String::new(),
        industry: String::new(),
        location: String::new(),
        company_domain: String::new(),
        profile_url: String::new(),
        list_tag: "earlier".into(),
        verified_status: VerificationStatus::Safe,
        verified_at: Some(Utc::now()),
        pushed_downstream: false,
    }
}

fn test_config() -> Config {
    ConfigBuilder::new()
        .oversample_factor(2.0)
        .batch_bounds(5, 50)
        .verify_sub_batch_size(3)
        .safety_multiplier(20)
        .audit_sample_dir("")
        .build()
        .unwrap()
}

/// Hands out pre-scripted pages, then empty pages forever.
struct ScriptedSource {
    pages: Mutex<VecDeque<Result<Vec<CandidateRecord>, SourceError>>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    fn new(pages: Vec<Result<Vec<CandidateRecord>, SourceError>>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(pages.into()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CandidateSource for ScriptedSource {
    async fn fetch_page(
        &self,
        _filter: &CandidateFilter,
        _limit: usize,
        _offset: usize,
    ) -> Result<Vec<CandidateRecord>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pages.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Cancels the run while its query is in flight, then fails.
struct CancelledMidQuery {
    cancel: CancellationToken,
}

#[async_trait]
impl CandidateSource for CancelledMidQuery {
    async fn fetch_page(
        &self,
        _filter: &CandidateFilter,
        _limit: usize,
        _offset: usize,
    ) -> Result<Vec<CandidateRecord>, SourceError> {
        self.cancel.cancel();
        Err(SourceError::Timeout("request aborted".into()))
    }

    fn name(&self) -> &str {
        "cancelled-mid-query"
    }
}

/// Generates fresh candidates at every offset.
struct EndlessSource;

#[async_trait]
impl CandidateSource for EndlessSource {
    async fn fetch_page(
        &self,
        _filter: &CandidateFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CandidateRecord>, SourceError> {
        Ok((offset..offset + limit)
            .map(|i| record(&format!("lead.number{}@acme.io", i), "John"))
            .collect())
    }

    fn name(&self) -> &str {
        "endless"
    }
}

/// Answers `Safe` unless told otherwise; counts every call.
#[derive(Default)]
struct FakeVerifier {
    statuses: HashMap<String, VerificationStatus>,
    failing: HashSet<String>,
    cancel_on_call: Option<CancellationToken>,
    calls: AtomicUsize,
}

impl FakeVerifier {
    fn with_status(mut self, email: &str, status: VerificationStatus) -> Self {
        self.statuses.insert(email.to_string(), status);
        self
    }

    fn failing_for(mut self, email: &str) -> Self {
        self.failing.insert(email.to_string());
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailVerifier for FakeVerifier {
    async fn verify(&self, email: &str) -> Result<VerificationStatus, VerificationCallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref token) = self.cancel_on_call {
            token.cancel();
        }
        if self.failing.contains(email) {
            return Err(VerificationCallError::Service("HTTP 500".into()));
        }
        Ok(self
            .statuses
            .get(email)
            .copied()
            .unwrap_or(VerificationStatus::Safe))
    }
}

/// Wraps a memory store to simulate races and write failures.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryLeadStore,
    hide_existing: bool,
    fail_inserts: bool,
    /// Cancels this token and fails the duplicate lookup.
    cancel_on_lookup: Option<CancellationToken>,
}

#[async_trait]
impl LeadStore for FlakyStore {
    async fn existing_emails(&self, emails: &[String]) -> Result<HashSet<String>, StoreError> {
        if let Some(ref token) = self.cancel_on_lookup {
            token.cancel();
            return Err(StoreError::Task("connection reset".into()));
        }
        if self.hide_existing {
            return Ok(HashSet::new());
        }
        self.inner.existing_emails(emails).await
    }

    async fn suppressed_emails(&self, emails: &[String]) -> Result<HashSet<String>, StoreError> {
        self.inner.suppressed_emails(emails).await
    }

    async fn cached_statuses(
        &self,
        emails: &[String],
    ) -> Result<HashMap<String, VerificationRecord>, StoreError> {
        self.inner.cached_statuses(emails).await
    }

    async fn record_verifications(&self, records: &[VerificationRecord]) -> Result<(), StoreError> {
        self.inner.record_verifications(records).await
    }

    async fn insert_leads(&self, leads: &[AcceptedLead]) -> Result<usize, StoreError> {
        if self.fail_inserts {
            return Err(StoreError::Task("disk full".into()));
        }
        self.inner.insert_leads(leads).await
    }

    async fn add_suppressions(
        &self,
        emails: &[String],
        source: SuppressionSource,
    ) -> Result<usize, StoreError> {
        self.inner.add_suppressions(emails, source).await
    }

    async fn all_lead_emails(&self) -> Result<Vec<String>, StoreError> {
        self.inner.all_lead_emails().await
    }

    async fn suppression_stats(&self) -> Result<SuppressionStats, StoreError> {
        self.inner.suppression_stats().await
    }

    async fn clear_suppressions(&self) -> Result<u64, StoreError> {
        self.inner.clear_suppressions().await
    }

    async fn list_stats(&self) -> Result<Vec<ListStats>, StoreError> {
        self.inner.list_stats().await
    }

    async fn lead_count(&self) -> Result<u64, StoreError> {
        self.inner.lead_count().await
    }
}

struct Outcome {
    result: lead_sieve_core::Result<RunReport>,
    events: Vec<ProgressEvent>,
}

impl Outcome {
    fn report(&self) -> &RunReport {
        match self.result {
            Ok(ref report) => report,
            Err(ref e) => panic!("run failed: {}", e),
        }
    }

    fn terminal(&self) -> &ProgressEvent {
        let terminals: Vec<&ProgressEvent> =
            self.events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminals.len(), 1, "expected exactly one terminal event");
        let last = self.events.last().unwrap();
        assert!(last.is_terminal(), "terminal event must come last");
        last
    }

    fn saw_phase(&self, phase: Phase) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, ProgressEvent::Progress(s) if s.phase == phase))
    }

    fn messages(&self, phase: Phase) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress(s) if s.phase == phase => Some(s.message.as_str()),
                _ => None,
            })
            .collect()
    }
}

async fn run_pipeline(
    source: Arc<dyn CandidateSource>,
    verifier: Arc<dyn EmailVerifier>,
    store: Arc<dyn LeadStore>,
    request: RunRequest,
    cancel: CancellationToken,
) -> Outcome {
    run_with_config(&test_config(), source, verifier, store, request, cancel).await
}

async fn run_with_config(
    config: &Config,
    source: Arc<dyn CandidateSource>,
    verifier: Arc<dyn EmailVerifier>,
    store: Arc<dyn LeadStore>,
    request: RunRequest,
    cancel: CancellationToken,
) -> Outcome {
    let (emitter, mut rx) = ProgressEmitter::channel();
    let pipeline = LeadPipeline::new(config, source, verifier, store);
    let result = pipeline.run(&request, &emitter, &cancel).await;
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    Outcome { result, events }
}

#[tokio::test]
async fn test_reaches_target_and_persists() {
    let store = Arc::new(MemoryLeadStore::new());
    let source = ScriptedSource::new(vec![Ok(people("alpha", 10))]);
    let verifier = Arc::new(FakeVerifier::default());

    let outcome = run_pipeline(
        source.clone(),
        verifier.clone(),
        store.clone(),
        RunRequest::new("q3-outreach", 3),
        CancellationToken::new(),
    )
    .await;

    let report = outcome.report();
    assert_eq!(report.summary.clean_leads, 3);
    assert_eq!(report.summary.persisted, 3);
    assert!(!report.summary.exhausted);
    assert_eq!(verifier.calls(), 3, "no verification beyond the target");
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert!(report.leads.iter().all(|l| l.list_tag == "q3-outreach"));
    assert_eq!(store.leads().len(), 3);
    assert!(matches!(outcome.terminal(), ProgressEvent::Done(s) if s.clean_leads == 3));
    assert!(matches!(outcome.events.first(), Some(ProgressEvent::Status { .. })));
}

#[tokio::test]
async fn test_filters_and_counters_reconcile() {
    let store = Arc::new(MemoryLeadStore::new());
    store
        .insert_leads(&[stored_lead("known.person@acme.io")])
        .await
        .unwrap();
    store
        .add_suppressions(&["blocked.person@acme.io".to_string()], SuppressionSource::Uploaded)
        .await
        .unwrap();

    let page = vec![
        record("Fresh.One@Acme.io", "Anna"),
        record("fresh.one@acme.io", "Anna"),
        record("known.person@acme.io", "Anna"),
        record("blocked.person@acme.io", "Anna"),
        record("info@acme.io", "Anna"),
        record("no.name@acme.io", ""),
        record("fresh.two@acme.io", "Anna"),
        record("bad.one@acme.io", "Anna"),
    ];
    let source = ScriptedSource::new(vec![Ok(page)]);
    let verifier =
        Arc::new(FakeVerifier::default().with_status("bad.one@acme.io", VerificationStatus::Invalid));

    let outcome = run_pipeline(
        source,
        verifier.clone(),
        store.clone(),
        RunRequest::new("reconcile", 10),
        CancellationToken::new(),
    )
    .await;

    let summary = &outcome.report().summary;
    let stats = &summary.stats;
    assert_eq!(stats.total_fetched, 8);
    assert_eq!(stats.pre_filtered, 1);
    assert_eq!(stats.duplicates_skipped, 2);
    assert_eq!(stats.suppressed_skipped, 1);
    assert_eq!(stats.total_candidates_after_local_filter, 3);
    assert_eq!(stats.total_sent_to_verifier, 3);
    assert_eq!(stats.cached_hits, 0);
    assert_eq!(verifier.calls(), 3);
    assert_eq!(summary.clean_leads, 2);
    assert!(summary.exhausted);
    assert_eq!(stats.status_breakdown.get("safe"), Some(&2));
    assert_eq!(stats.status_breakdown.get("invalid"), Some(&1));
    assert_eq!(stats.status_breakdown.get("pre_filtered"), Some(&1));
    assert_eq!(stats.source_stats["apollo"].total, 3);

    let emails: Vec<String> = outcome.report().leads.iter().map(|l| l.email.clone()).collect();
    assert_eq!(emails, vec!["fresh.one@acme.io", "fresh.two@acme.io"]);
    assert!(outcome.saw_phase(Phase::Filtered));
    assert!(outcome.saw_phase(Phase::Exhausted));
    assert!(matches!(outcome.terminal(), ProgressEvent::Done(_)));
}

#[tokio::test]
async fn test_cached_result_skips_verifier() {
    let store = Arc::new(MemoryLeadStore::new());
    let verified_at = Utc::now() - chrono::Duration::days(3);
    store
        .record_verifications(&[VerificationRecord {
            email: "cached.person@acme.io".into(),
            status: VerificationStatus::Safe,
            verified_at,
        }])
        .await
        .unwrap();

    let source = ScriptedSource::new(vec![Ok(vec![record("cached.person@acme.io", "Anna")])]);
    let verifier = Arc::new(FakeVerifier::default());

    let outcome = run_pipeline(
        source,
        verifier.clone(),
        store,
        RunRequest::new("cache", 1),
        CancellationToken::new(),
    )
    .await;

    let report = outcome.report();
    assert_eq!(verifier.calls(), 0);
    assert_eq!(report.summary.stats.cached_hits, 1);
    assert_eq!(report.summary.stats.total_sent_to_verifier, 0);
    assert_eq!(report.summary.stats.status_breakdown.get("cached"), Some(&1));
    assert_eq!(report.summary.stats.status_breakdown.get("safe"), Some(&1));
    assert_eq!(report.leads[0].verified_at, Some(verified_at));
}

#[tokio::test]
async fn test_verifier_failure_is_isolated() {
    let store = Arc::new(MemoryLeadStore::new());
    let page = people("beta", 3);
    let broken = "beta.person1@acme.io";
    let source = ScriptedSource::new(vec![Ok(page)]);
    let verifier = Arc::new(FakeVerifier::default().failing_for(broken));

    let outcome = run_pipeline(
        source,
        verifier,
        store.clone(),
        RunRequest::new("isolation", 5),
        CancellationToken::new(),
    )
    .await;

    let report = outcome.report();
    assert_eq!(report.summary.clean_leads, 2);
    assert_eq!(report.summary.stats.status_breakdown.get("error"), Some(&1));
    assert!(report.leads.iter().all(|l| l.email != broken));
    assert!(outcome.saw_phase(Phase::ErrorInBatch));

    let cached = store
        .cached_statuses(&[broken.to_string(), "beta.person0@acme.io".to_string()])
        .await
        .unwrap();
    assert!(!cached.contains_key(broken), "failed calls are not remembered");
    assert!(cached.contains_key("beta.person0@acme.io"));
}

#[tokio::test]
async fn test_empty_source_finishes_exhausted() {
    let outcome = run_pipeline(
        ScriptedSource::new(vec![]),
        Arc::new(FakeVerifier::default()),
        Arc::new(MemoryLeadStore::new()),
        RunRequest::new("empty", 10),
        CancellationToken::new(),
    )
    .await;

    match outcome.terminal() {
        ProgressEvent::Done(summary) => {
            assert_eq!(summary.clean_leads, 0);
            assert!(summary.exhausted);
            assert!(summary.success);
        }
        other => panic!("expected done, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fetch_error_without_leads_fails_run() {
    let source = ScriptedSource::new(vec![Err(SourceError::Auth("token expired".into()))]);
    let outcome = run_pipeline(
        source,
        Arc::new(FakeVerifier::default()),
        Arc::new(MemoryLeadStore::new()),
        RunRequest::new("broken", 10),
        CancellationToken::new(),
    )
    .await;

    assert!(matches!(outcome.result, Err(AppError::Source(SourceError::Auth(_)))));
    match outcome.terminal() {
        ProgressEvent::Error { message } => assert!(message.contains("token expired")),
        other => panic!("expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fetch_error_after_leads_keeps_partial_result() {
    let store = Arc::new(MemoryLeadStore::new());
    let source = ScriptedSource::new(vec![
        Ok(people("gamma", 2)),
        Err(SourceError::Timeout("query exceeded deadline".into())),
    ]);
    let outcome = run_pipeline(
        source,
        Arc::new(FakeVerifier::default()),
        store.clone(),
        RunRequest::new("partial", 10),
        CancellationToken::new(),
    )
    .await;

    let report = outcome.report();
    assert_eq!(report.summary.clean_leads, 2);
    assert_eq!(report.summary.persisted, 2);
    assert!(report.summary.exhausted);
    assert_eq!(store.leads().len(), 2);
    assert!(matches!(outcome.terminal(), ProgressEvent::Done(_)));
}

#[tokio::test]
async fn test_cancel_before_start_reports_nothing_found() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let source = ScriptedSource::new(vec![Ok(people("delta", 5))]);
    let outcome = run_pipeline(
        source.clone(),
        Arc::new(FakeVerifier::default()),
        Arc::new(MemoryLeadStore::new()),
        RunRequest::new("cancelled", 5),
        cancel,
    )
    .await;

    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    match outcome.terminal() {
        ProgressEvent::Done(summary) => {
            assert!(summary.cancelled);
            assert_eq!(summary.clean_leads, 0);
            assert_eq!(summary.message(), "Stopped before any verified leads were found.");
        }
        other => panic!("expected done, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancel_mid_run_saves_accepted_leads() {
    let cancel = CancellationToken::new();
    let store = Arc::new(MemoryLeadStore::new());
    let verifier = Arc::new(FakeVerifier {
        cancel_on_call: Some(cancel.clone()),
        ..FakeVerifier::default()
    });
    let source = ScriptedSource::new(vec![Ok(people("epsilon", 9))]);

    let outcome = run_pipeline(
        source,
        verifier.clone(),
        store.clone(),
        RunRequest::new("interrupted", 9),
        cancel,
    )
    .await;

    let report = outcome.report();
    assert_eq!(verifier.calls(), 3, "only the first sub-batch runs");
    assert!(report.summary.cancelled);
    assert_eq!(report.summary.clean_leads, 3);
    assert_eq!(report.summary.persisted, 3);
    assert_eq!(store.leads().len(), 3);
    assert!(matches!(outcome.terminal(), ProgressEvent::Done(_)));
}

#[tokio::test]
async fn test_safety_ceiling_stops_unproductive_run() {
    let verifier = Arc::new(FakeVerifier::default());
    let config = ConfigBuilder::new()
        .oversample_factor(2.0)
        .batch_bounds(5, 50)
        .safety_multiplier(5)
        .acceptable_statuses(vec!["catch_all".into()])
        .audit_sample_dir("")
        .build()
        .unwrap();
    let (emitter, mut rx) = ProgressEmitter::channel();
    let pipeline = LeadPipeline::new(
        &config,
        Arc::new(EndlessSource),
        verifier.clone(),
        Arc::new(MemoryLeadStore::new()),
    );

    let report = pipeline
        .run(&RunRequest::new("ceiling", 2), &emitter, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.summary.clean_leads, 0);
    assert_eq!(report.summary.stats.candidates_checked, 10);
    assert!(report.summary.message().contains("Stopped after examining 10 candidates"));
    assert_eq!(verifier.calls(), 10);

    let mut terminals = 0;
    while let Ok(event) = rx.try_recv() {
        terminals += usize::from(event.is_terminal());
    }
    assert_eq!(terminals, 1);
}

#[tokio::test]
async fn test_concurrent_insert_is_not_double_counted() {
    let store = Arc::new(FlakyStore {
        hide_existing: true,
        ..FlakyStore::default()
    });
    store
        .inner
        .insert_leads(&[stored_lead("zeta.person0@acme.io")])
        .await
        .unwrap();

    let outcome = run_pipeline(
        ScriptedSource::new(vec![Ok(people("zeta", 2))]),
        Arc::new(FakeVerifier::default()),
        store.clone(),
        RunRequest::new("race", 2),
        CancellationToken::new(),
    )
    .await;

    let report = outcome.report();
    assert_eq!(report.summary.clean_leads, 2);
    assert_eq!(report.summary.persisted, 1);
    assert_eq!(store.inner.leads().len(), 2);
    let original = store
        .inner
        .leads()
        .into_iter()
        .find(|l| l.email == "zeta.person0@acme.io")
        .unwrap();
    assert_eq!(original.list_tag, "earlier");
    assert_eq!(
        outcome.messages(Phase::Saving),
        vec![
            "Saving 2 leads to the database...",
            "Saved 2/2 leads (1 duplicates skipped)."
        ]
    );
}

#[tokio::test]
async fn test_failed_save_returns_unsaved_leads() {
    let store = Arc::new(FlakyStore {
        fail_inserts: true,
        ..FlakyStore::default()
    });
    let outcome = run_pipeline(
        ScriptedSource::new(vec![Ok(people("eta", 4))]),
        Arc::new(FakeVerifier::default()),
        store,
        RunRequest::new("doomed", 4),
        CancellationToken::new(),
    )
    .await;

    match outcome.result {
        Err(AppError::Persistence { at_risk, ref leads, .. }) => {
            assert_eq!(at_risk, 4);
            assert_eq!(leads.len(), 4);
        }
        ref other => panic!("expected persistence error, got {:?}", other.as_ref().map(|_| ())),
    }
    match outcome.terminal() {
        ProgressEvent::Error { message } => assert!(message.contains("4 verified leads")),
        other => panic!("expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_request_emits_error() {
    let outcome = run_pipeline(
        ScriptedSource::new(vec![]),
        Arc::new(FakeVerifier::default()),
        Arc::new(MemoryLeadStore::new()),
        RunRequest::new("   ", 10),
        CancellationToken::new(),
    )
    .await;
    assert!(matches!(outcome.result, Err(AppError::InvalidRequest(_))));
    assert!(matches!(outcome.terminal(), ProgressEvent::Error { .. }));

    let outcome = run_pipeline(
        ScriptedSource::new(vec![]),
        Arc::new(FakeVerifier::default()),
        Arc::new(MemoryLeadStore::new()),
        RunRequest::new("zero", 0),
        CancellationToken::new(),
    )
    .await;
    assert!(matches!(outcome.result, Err(AppError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_second_run_skips_leads_from_first() {
    let store = Arc::new(MemoryLeadStore::new());
    let first = run_pipeline(
        ScriptedSource::new(vec![Ok(people("theta", 3))]),
        Arc::new(FakeVerifier::default()),
        store.clone(),
        RunRequest::new("first", 3),
        CancellationToken::new(),
    )
    .await;
    assert_eq!(first.report().summary.persisted, 3);

    let verifier = Arc::new(FakeVerifier::default());
    let second = run_pipeline(
        ScriptedSource::new(vec![Ok(people("theta", 3))]),
        verifier.clone(),
        store.clone(),
        RunRequest::new("second", 3),
        CancellationToken::new(),
    )
    .await;
    let summary = &second.report().summary;
    assert_eq!(summary.clean_leads, 0);
    assert_eq!(summary.stats.duplicates_skipped, 3);
    assert_eq!(verifier.calls(), 0);
    assert_eq!(store.leads().len(), 3);
}

#[tokio::test]
async fn test_saving_progress_follows_each_chunk() {
    let config = ConfigBuilder::new()
        .oversample_factor(2.0)
        .batch_bounds(5, 50)
        .persist_chunk_size(2)
        .audit_sample_dir("")
        .build()
        .unwrap();
    let outcome = run_with_config(
        &config,
        ScriptedSource::new(vec![Ok(people("iota", 5))]),
        Arc::new(FakeVerifier::default()),
        Arc::new(MemoryLeadStore::new()),
        RunRequest::new("chunks", 5),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(outcome.report().summary.persisted, 5);
    assert_eq!(
        outcome.messages(Phase::Saving),
        vec![
            "Saving 5 leads to the database...",
            "Saved 2/5 leads (0 duplicates skipped).",
            "Saved 4/5 leads (0 duplicates skipped).",
            "Saved 5/5 leads (0 duplicates skipped)."
        ]
    );
}

#[tokio::test]
async fn test_cancelled_run_announces_partial_save() {
    let cancel = CancellationToken::new();
    let verifier = Arc::new(FakeVerifier {
        cancel_on_call: Some(cancel.clone()),
        ..FakeVerifier::default()
    });
    let outcome = run_pipeline(
        ScriptedSource::new(vec![Ok(people("kappa", 9))]),
        verifier,
        Arc::new(MemoryLeadStore::new()),
        RunRequest::new("stopped", 9),
        cancel,
    )
    .await;

    let saving = outcome.messages(Phase::Saving);
    assert_eq!(saving[0], "Stopped! Saving 3 leads collected so far...");
    assert_eq!(saving.last(), Some(&"Saved 3/3 leads (0 duplicates skipped)."));
}

#[tokio::test]
async fn test_fetch_error_after_cancel_finishes_as_cancelled() {
    let cancel = CancellationToken::new();
    let source = Arc::new(CancelledMidQuery {
        cancel: cancel.clone(),
    });
    let outcome = run_pipeline(
        source,
        Arc::new(FakeVerifier::default()),
        Arc::new(MemoryLeadStore::new()),
        RunRequest::new("cancelled-query", 5),
        cancel,
    )
    .await;

    let report = outcome.report();
    assert!(report.summary.cancelled);
    assert!(!report.summary.exhausted);
    assert_eq!(report.summary.clean_leads, 0);
    match outcome.terminal() {
        ProgressEvent::Done(summary) => {
            assert_eq!(summary.message(), "Stopped before any verified leads were found.")
        }
        other => panic!("expected done, got {:?}", other),
    }
}

#[tokio::test]
async fn test_lookup_error_after_cancel_finishes_as_cancelled() {
    let cancel = CancellationToken::new();
    let store = Arc::new(FlakyStore {
        cancel_on_lookup: Some(cancel.clone()),
        ..FlakyStore::default()
    });
    let verifier = Arc::new(FakeVerifier::default());
    let outcome = run_pipeline(
        ScriptedSource::new(vec![Ok(people("lambda", 4))]),
        verifier.clone(),
        store,
        RunRequest::new("cancelled-lookup", 4),
        cancel,
    )
    .await;

    assert!(outcome.report().summary.cancelled);
    assert_eq!(verifier.calls(), 0);
    assert!(matches!(outcome.terminal(), ProgressEvent::Done(_)));
}

#[tokio::test]
async fn test_cached_hits_past_target_are_counted_not_accepted() {
    let store = Arc::new(MemoryLeadStore::new());
    let verified_at = Utc::now() - chrono::Duration::days(1);
    let records: Vec<VerificationRecord> = ["mu.person0@acme.io", "mu.person1@acme.io"]
        .iter()
        .map(|email| VerificationRecord {
            email: email.to_string(),
            status: VerificationStatus::Safe,
            verified_at,
        })
        .collect();
    store.record_verifications(&records).await.unwrap();

    let verifier = Arc::new(FakeVerifier::default());
    let outcome = run_pipeline(
        ScriptedSource::new(vec![Ok(people("mu", 2))]),
        verifier.clone(),
        store.clone(),
        RunRequest::new("over-target", 1),
        CancellationToken::new(),
    )
    .await;

    let summary = &outcome.report().summary;
    assert_eq!(summary.clean_leads, 1);
    assert_eq!(summary.stats.cached_hits, 2);
    assert_eq!(summary.stats.status_breakdown.get("safe"), Some(&2));
    assert_eq!(summary.stats.source_stats["apollo"].total, 2);
    assert_eq!(verifier.calls(), 0);
    assert_eq!(store.leads().len(), 1);
}

#[tokio::test]
async fn test_audit_sample_written_for_cached_and_fresh_results() {
    let dir = tempfile::tempdir().unwrap();
    let samples = dir.path().join("samples");
    let config = ConfigBuilder::new()
        .oversample_factor(2.0)
        .batch_bounds(5, 50)
        .verify_sub_batch_size(3)
        .audit_sample_dir(samples.to_string_lossy())
        .build()
        .unwrap();

    let store = Arc::new(MemoryLeadStore::new());
    store
        .record_verifications(&[VerificationRecord {
            email: "nu.person0@acme.io".into(),
            status: VerificationStatus::Invalid,
            verified_at: Utc::now(),
        }])
        .await
        .unwrap();

    let outcome = run_with_config(
        &config,
        ScriptedSource::new(vec![Ok(people("nu", 3))]),
        Arc::new(FakeVerifier::default()),
        store,
        RunRequest::new("Q3 audit", 2),
        CancellationToken::new(),
    )
    .await;

    let stats = &outcome.report().summary.stats;
    assert_eq!(stats.sample_csv_entries, 3);
    let file = stats.sample_csv_file.clone().expect("sample file name");
    assert!(file.starts_with("Q3_audit_"));
    assert!(file.ends_with(".csv"));

    let written = std::fs::read_to_string(samples.join(&file)).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines[0], "email,source,reoon_status,cached");
    assert_eq!(lines[1], "nu.person0@acme.io,apollo,invalid,true");
    assert!(lines[2..].iter().all(|l| l.ends_with(",apollo,safe,false")));
    assert_eq!(lines.len(), 4);
}

#[tokio::test]
async fn test_audit_sample_disabled_writes_nothing() {
    let outcome = run_pipeline(
        ScriptedSource::new(vec![Ok(people("xi", 2))]),
        Arc::new(FakeVerifier::default()),
        Arc::new(MemoryLeadStore::new()),
        RunRequest::new("quiet", 2),
        CancellationToken::new(),
    )
    .await;

    let stats = &outcome.report().summary.stats;
    assert_eq!(stats.sample_csv_entries, 2);
    assert_eq!(stats.sample_csv_file, None);
}
