//! The adaptive list-generation loop.
//!
//! One call to [`LeadPipeline::run`] walks an explicit state machine:
//! fetch a page sized to the remaining target, normalize and pre-filter it,
//! drop duplicates and suppressed addresses, resolve what it can from the
//! verification cache, verify the rest in small concurrent sub-batches, and
//! repeat until a stop condition holds. Accepted leads are then written in
//! chunks and exactly one terminal event is emitted.

use crate::core::audit;
use crate::core::config::Config;
use crate::core::dedup::Deduplicator;
use crate::core::error::{AppError, Result, StoreError};
use crate::core::models::{
    AcceptedLead, CandidateRecord, NormalizedCandidate, RunRequest, VerificationStatus,
};
use crate::core::progress::{Phase, ProgressEmitter, RunSummary};
use crate::core::run_state::{RunState, StopReason};
use crate::source::{CandidateFilter, CandidateSource};
use crate::store::LeadStore;
use crate::utils::gender::{GenderClassifier, NameTableClassifier};
use crate::utils::normalize::normalize_candidate;
use crate::utils::prefilter::FilterRules;
use crate::verification::{EmailVerifier, VerificationOutcome, VerificationStage};

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Loop tuning taken from `Config` once per pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub oversample_factor: f64,
    pub min_batch: usize,
    pub max_batch: usize,
    pub safety_multiplier: usize,
    pub persist_chunk_size: usize,
    pub enabled_sources: Vec<String>,
    pub audit_sample_dir: Option<PathBuf>,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            oversample_factor: config.oversample_factor,
            min_batch: config.min_batch,
            max_batch: config.max_batch,
            safety_multiplier: config.safety_multiplier,
            persist_chunk_size: config.persist_chunk_size.max(1),
            enabled_sources: config.enabled_sources.clone(),
            audit_sample_dir: config.audit_sample_dir.as_ref().map(PathBuf::from),
        }
    }
}

/// What a successful run hands back besides its events.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: RunSummary,
    pub leads: Vec<AcceptedLead>,
}

enum Step {
    Fetch,
    Process(Vec<CandidateRecord>),
    Finalize(StopReason),
    Abort(AppError),
}

/// Mutable state of one run, dropped when the run ends.
struct RunContext<'a> {
    request: &'a RunRequest,
    list_tag: String,
    filter: CandidateFilter,
    state: RunState,
    dedup: Deduplicator,
    accepted: Vec<AcceptedLead>,
    emitter: &'a ProgressEmitter,
    cancel: &'a CancellationToken,
}

impl RunContext<'_> {
    /// Polled after every awaited external call.
    fn observe_cancel(&mut self) -> bool {
        if self.cancel.is_cancelled() && !self.state.cancelled {
            tracing::info!(target: "pipeline", "[{}] Cancellation observed after batch {}", self.list_tag, self.state.batch);
            self.state.cancelled = true;
        }
        self.state.cancelled
    }

    fn accept(&mut self, outcome: VerificationOutcome, acceptable: bool) {
        self.state
            .record_status(&outcome.candidate, outcome.status, outcome.from_cache);
        if acceptable && !self.state.target_reached() {
            self.accepted.push(AcceptedLead::from_candidate(
                outcome.candidate,
                &self.list_tag,
                outcome.status,
                outcome.verified_at,
            ));
            self.state.accepted = self.accepted.len();
        }
    }
}

/// Drives one list-generation run against injected collaborators.
pub struct LeadPipeline {
    source: Arc<dyn CandidateSource>,
    store: Arc<dyn LeadStore>,
    stage: VerificationStage,
    classifier: Arc<dyn GenderClassifier>,
    rules: FilterRules,
    settings: PipelineSettings,
}

impl LeadPipeline {
    pub fn new(
        config: &Config,
        source: Arc<dyn CandidateSource>,
        verifier: Arc<dyn EmailVerifier>,
        store: Arc<dyn LeadStore>,
    ) -> Self {
        let stage = VerificationStage::new(
            verifier,
            Arc::clone(&store),
            config.acceptable_statuses.clone(),
            config.verify_sub_batch_size,
            config.verify_timeout,
        );
        Self {
            source,
            store,
            stage,
            classifier: Arc::new(NameTableClassifier::bundled()),
            rules: FilterRules::default(),
            settings: PipelineSettings::from(config),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn GenderClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_rules(mut self, rules: FilterRules) -> Self {
        self.rules = rules;
        self
    }

    /// Runs the loop to completion.
    ///
    /// Emits a sequence of events ending in exactly one `done` or `error`.
    /// Returns `Err` only alongside an `error` event: an invalid request, a
    /// fatal source or store failure before any lead was accepted, or a
    /// failed final write (which carries the unsaved leads).
    pub async fn run(
        &self,
        request: &RunRequest,
        emitter: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let list_tag = request.list_name.trim().to_string();
        if list_tag.is_empty() || request.target == 0 {
            let err = AppError::InvalidRequest(if list_tag.is_empty() {
                "list name must not be empty".to_string()
            } else {
                "target must be a positive integer".to_string()
            });
            emitter.error(err.to_string());
            return Err(err);
        }

        let started = Instant::now();
        tracing::info!(target: "pipeline", "[{}] Starting run: target={}, gender={}, industry={}, source={}",
            list_tag, request.target, request.gender,
            request.industry.as_deref().unwrap_or("any"), self.source.name());
        emitter.status(format!(
            "Generating '{}': {} leads, gender {}, industry {}",
            list_tag,
            request.target,
            request.gender,
            request.industry.as_deref().unwrap_or("any")
        ));

        let mut ctx = RunContext {
            request,
            filter: CandidateFilter::new(
                request.industry.clone(),
                self.settings.enabled_sources.clone(),
            ),
            state: RunState::new(request.target),
            dedup: Deduplicator::new(Arc::clone(&self.store)),
            accepted: Vec::with_capacity(request.target.min(10_000)),
            list_tag,
            emitter,
            cancel,
        };

        let mut step = Step::Fetch;
        loop {
            step = match step {
                Step::Fetch => self.fetch(&mut ctx).await,
                Step::Process(records) => self.process(&mut ctx, records).await,
                Step::Finalize(reason) => {
                    let result = self.finalize(ctx, reason).await;
                    tracing::info!(target: "pipeline", "Run finished in {:.2?}", started.elapsed());
                    return result;
                }
                Step::Abort(err) => {
                    tracing::error!(target: "pipeline", "[{}] Run aborted: {}", ctx.list_tag, err);
                    emitter.error(err.to_string());
                    return Err(err);
                }
            };
        }
    }

    async fn fetch(&self, ctx: &mut RunContext<'_>) -> Step {
        let cancelled = ctx.observe_cancel();
        if let Some(reason) = ctx
            .state
            .stop_reason(self.settings.safety_multiplier, cancelled)
        {
            return Step::Finalize(reason);
        }

        let size = ctx.state.next_fetch_size(
            self.settings.oversample_factor,
            self.settings.min_batch,
            self.settings.max_batch,
        );
        let offset = ctx.state.offset;
        ctx.state.batch += 1;
        ctx.emitter.progress(
            &ctx.state,
            Phase::Fetching,
            format!(
                "Batch {}: fetching {} candidates (have {}/{})",
                ctx.state.batch, size, ctx.state.accepted, ctx.state.target
            ),
        );
        tracing::debug!(target: "pipeline", "[{}] Batch {}: fetch size {} at offset {}",
            ctx.list_tag, ctx.state.batch, size, offset);

        let page = self.source.fetch_page(&ctx.filter, size, offset).await;
        let page = match page {
            Ok(records) => records,
            Err(e) => {
                if ctx.observe_cancel() {
                    tracing::info!(target: "pipeline", "[{}] Fetch failed after cancellation [{}]: {}",
                        ctx.list_tag, e.kind(), e);
                    return Step::Finalize(StopReason::Cancelled);
                }
                if ctx.accepted.is_empty() {
                    return Step::Abort(AppError::Source(e));
                }
                tracing::warn!(target: "pipeline", "[{}] Fetch failed [{}] with {} leads in hand; finishing early: {}",
                    ctx.list_tag, e.kind(), ctx.accepted.len(), e);
                ctx.state.exhausted = true;
                ctx.emitter.progress(
                    &ctx.state,
                    Phase::Exhausted,
                    format!("Source error ({}); keeping the {} leads found so far", e.kind(), ctx.accepted.len()),
                );
                return Step::Finalize(StopReason::Exhausted);
            }
        };

        ctx.state.record_fetch(size, page.len());
        if ctx.observe_cancel() {
            return Step::Finalize(StopReason::Cancelled);
        }
        if page.is_empty() {
            ctx.state.exhausted = true;
            ctx.emitter.progress(
                &ctx.state,
                Phase::Exhausted,
                "No more candidates available from the source",
            );
            return Step::Finalize(StopReason::Exhausted);
        }
        Step::Process(page)
    }

    async fn process(&self, ctx: &mut RunContext<'_>, records: Vec<CandidateRecord>) -> Step {
        let fetched = records.len();
        let mut passed: Vec<NormalizedCandidate> = Vec::with_capacity(fetched);
        let mut rejected = 0u64;
        let mut pre_filtered = 0u64;
        for record in &records {
            match normalize_candidate(record, self.classifier.as_ref(), ctx.request.gender) {
                Ok(candidate) => match self.rules.check(&candidate.email) {
                    None => passed.push(candidate),
                    Some(rule) => {
                        tracing::trace!(target: "pipeline", "Pre-filtered {}: {}", candidate.email, rule);
                        pre_filtered += 1;
                    }
                },
                Err(reason) => {
                    tracing::trace!(target: "pipeline", "Normalizer dropped {:?}: {}", record.email, reason);
                    rejected += 1;
                }
            }
        }
        ctx.state.normalize_rejected += rejected;
        ctx.state.record_pre_filtered(pre_filtered);

        let deduped = ctx.dedup.filter_batch(passed).await;
        let deduped = match deduped {
            Ok(outcome) => outcome,
            Err(e) => return self.on_store_failure(ctx, e),
        };
        ctx.state.duplicates += deduped.duplicates;
        ctx.state.suppressed += deduped.suppressed;
        ctx.state.after_local_filter += deduped.fresh.len() as u64;
        ctx.emitter.progress(
            &ctx.state,
            Phase::Filtered,
            format!(
                "Batch {}: {} of {} candidates left after filters ({} pre-filtered, {} duplicates, {} suppressed)",
                ctx.state.batch,
                deduped.fresh.len(),
                fetched,
                pre_filtered,
                deduped.duplicates,
                deduped.suppressed
            ),
        );
        if ctx.observe_cancel() {
            return Step::Finalize(StopReason::Cancelled);
        }
        if deduped.fresh.is_empty() {
            return Step::Fetch;
        }

        let (hits, misses) = self.stage.split_cached(deduped.fresh).await;
        // Hits past the target still count toward stats; `accept` stops adding leads.
        for hit in hits {
            let acceptable = self.stage.is_acceptable(hit.status);
            ctx.accept(hit, acceptable);
        }
        if ctx.observe_cancel() {
            return Step::Finalize(StopReason::Cancelled);
        }

        let total_to_verify = misses.len();
        let mut sent = 0usize;
        let mut pending = misses.into_iter();
        while !ctx.state.target_reached() {
            let chunk: Vec<NormalizedCandidate> =
                pending.by_ref().take(self.stage.sub_batch_size()).collect();
            if chunk.is_empty() {
                break;
            }
            let chunk_len = chunk.len();
            sent += chunk_len;
            ctx.state.sent_to_verifier += chunk_len as u64;

            let outcomes = self.stage.verify_sub_batch(chunk).await;
            let failed = outcomes
                .iter()
                .filter(|o| o.status == VerificationStatus::Error)
                .count();
            for outcome in outcomes {
                let acceptable = self.stage.is_acceptable(outcome.status);
                ctx.accept(outcome, acceptable);
            }

            if failed > 0 {
                ctx.emitter.progress(
                    &ctx.state,
                    Phase::ErrorInBatch,
                    format!("{} of {} verification calls failed; continuing", failed, chunk_len),
                );
            }
            ctx.emitter.progress(
                &ctx.state,
                Phase::Verifying,
                format!(
                    "Batch {}: verified {}/{} ({} clean of {})",
                    ctx.state.batch, sent, total_to_verify, ctx.state.accepted, ctx.state.target
                ),
            );
            if ctx.observe_cancel() {
                return Step::Finalize(StopReason::Cancelled);
            }
        }

        tracing::debug!(target: "pipeline", "[{}] Batch {} done: {} accepted so far, {} examined",
            ctx.list_tag, ctx.state.batch, ctx.state.accepted, ctx.state.candidates_checked);
        Step::Fetch
    }

    fn on_store_failure(&self, ctx: &mut RunContext<'_>, err: StoreError) -> Step {
        if ctx.observe_cancel() {
            tracing::info!(target: "pipeline", "[{}] Dedup lookup failed after cancellation: {}", ctx.list_tag, err);
            return Step::Finalize(StopReason::Cancelled);
        }
        if ctx.accepted.is_empty() {
            return Step::Abort(AppError::Store(err));
        }
        tracing::warn!(target: "pipeline", "[{}] Dedup lookup failed with {} leads in hand; finishing early: {}",
            ctx.list_tag, ctx.accepted.len(), err);
        ctx.state.exhausted = true;
        ctx.emitter.progress(
            &ctx.state,
            Phase::Exhausted,
            format!("Lookup error; keeping the {} leads found so far", ctx.accepted.len()),
        );
        Step::Finalize(StopReason::Exhausted)
    }

    async fn finalize(&self, ctx: RunContext<'_>, reason: StopReason) -> Result<RunReport> {
        let RunContext {
            list_tag,
            state,
            accepted,
            emitter,
            ..
        } = ctx;

        for (source, stats) in &state.source_stats {
            tracing::info!(target: "pipeline", "[{}] Source '{}': {} verified, {} safe ({}%), {} invalid, {} catch-all, {} unknown, {} other",
                list_tag, source, stats.total, stats.safe, stats.safe_rate(), stats.invalid,
                stats.catch_all, stats.unknown, stats.other);
        }
        tracing::info!(target: "pipeline", "[{}] Stopped ({:?}): {} accepted of {}, {} fetched, {} sent to verifier, {} cached, {} duplicates, {} suppressed, {} pre-filtered, {} rejected by normalizer",
            list_tag, reason, accepted.len(), state.target, state.total_fetched, state.sent_to_verifier,
            state.cached, state.duplicates, state.suppressed, state.pre_filtered, state.normalize_rejected);

        let mut persisted = 0usize;
        let mut written = 0usize;
        if !accepted.is_empty() {
            let announce = if reason == StopReason::Cancelled {
                format!("Stopped! Saving {} leads collected so far...", accepted.len())
            } else {
                format!("Saving {} leads to the database...", accepted.len())
            };
            emitter.progress(&state, Phase::Saving, announce);
            for chunk in accepted.chunks(self.settings.persist_chunk_size) {
                match self.store.insert_leads(chunk).await {
                    Ok(inserted) => {
                        persisted += inserted;
                        written += chunk.len();
                        let skipped = chunk.len() - inserted;
                        if skipped > 0 {
                            tracing::warn!(target: "pipeline", "[{}] {} leads were stored by another run in the meantime",
                                list_tag, skipped);
                        }
                        emitter.progress(
                            &state,
                            Phase::Saving,
                            format!(
                                "Saved {}/{} leads ({} duplicates skipped).",
                                written,
                                accepted.len(),
                                skipped
                            ),
                        );
                    }
                    Err(e) => {
                        let unsaved = accepted[written..].to_vec();
                        let err = AppError::Persistence {
                            at_risk: unsaved.len(),
                            leads: unsaved,
                            source: e,
                        };
                        tracing::error!(target: "pipeline", "[{}] {}", list_tag, err);
                        emitter.error(err.to_string());
                        return Err(err);
                    }
                }
            }
        }

        let message = match reason {
            StopReason::Cancelled if accepted.is_empty() => {
                "Stopped before any verified leads were found.".to_string()
            }
            StopReason::Cancelled => format!("Stopped early: saved {} verified leads.", persisted),
            StopReason::TargetReached => format!(
                "Generated {} verified leads for '{}'.",
                accepted.len(),
                list_tag
            ),
            StopReason::Exhausted => format!(
                "Source exhausted: found {} of {} requested leads.",
                accepted.len(),
                state.target
            ),
            StopReason::SafetyCeiling => format!(
                "Stopped after examining {} candidates: found {} of {} requested leads.",
                state.candidates_checked,
                accepted.len(),
                state.target
            ),
        };

        let sample_file = self.write_audit_sample(&list_tag, &state);
        let summary = RunSummary::from_state(&state, &list_tag, persisted, message)
            .with_audit_sample(state.audit_sample.len(), sample_file);
        tracing::info!(target: "pipeline", "[{}] {}", list_tag, summary.message());
        emitter.done(summary.clone());
        Ok(RunReport {
            summary,
            leads: accepted,
        })
    }

    /// Writes the run's audit sample; failures are logged and never fail the run.
    fn write_audit_sample(&self, list_tag: &str, state: &RunState) -> Option<String> {
        let dir = self.settings.audit_sample_dir.as_ref()?;
        if state.audit_sample.is_empty() {
            return None;
        }
        match audit::write_sample(dir, list_tag, &state.audit_sample, Utc::now()) {
            Ok(path) => {
                tracing::info!(target: "pipeline", "[{}] Audit sample saved: {} ({} entries)",
                    list_tag, path.display(), state.audit_sample.len());
                path.file_name().map(|name| name.to_string_lossy().into_owned())
            }
            Err(e) => {
                tracing::warn!(target: "pipeline", "[{}] Could not write audit sample to {}: {}",
                    list_tag, dir.display(), e);
                None
            }
        }
    }
}
