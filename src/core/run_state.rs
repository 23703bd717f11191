//! Per-run working state of the orchestrator.

use crate::core::audit::{AuditRow, AUDIT_SAMPLE_CAP};
use crate::core::models::{NormalizedCandidate, VerificationStatus};
use serde::Serialize;
use std::collections::BTreeMap;

/// Verification outcomes for one source identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub total: u64,
    pub safe: u64,
    pub invalid: u64,
    pub catch_all: u64,
    pub unknown: u64,
    pub other: u64,
}

impl SourceStats {
    fn record(&mut self, status: VerificationStatus) {
        self.total += 1;
        match status {
            VerificationStatus::Safe => self.safe += 1,
            VerificationStatus::Invalid => self.invalid += 1,
            VerificationStatus::CatchAll => self.catch_all += 1,
            VerificationStatus::Unknown => self.unknown += 1,
            _ => self.other += 1,
        }
    }

    /// Share of safe results, as a whole percentage.
    pub fn safe_rate(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            (self.safe * 100 + self.total / 2) / self.total
        }
    }
}

/// Why the adaptive loop stopped fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TargetReached,
    Exhausted,
    SafetyCeiling,
    Cancelled,
}

/// Mutable counters for one run. Owned and mutated only by the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub target: usize,
    pub accepted: usize,
    pub batch: u32,
    pub offset: usize,
    pub total_fetched: u64,
    pub candidates_checked: u64,
    pub normalize_rejected: u64,
    pub pre_filtered: u64,
    pub duplicates: u64,
    pub suppressed: u64,
    pub after_local_filter: u64,
    pub cached: u64,
    pub sent_to_verifier: u64,
    pub status_breakdown: BTreeMap<String, u64>,
    pub source_stats: BTreeMap<String, SourceStats>,
    /// First outcomes of the run, capped at `AUDIT_SAMPLE_CAP`.
    pub audit_sample: Vec<AuditRow>,
    pub exhausted: bool,
    pub cancelled: bool,
}

impl RunState {
    pub fn new(target: usize) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }

    pub fn remaining(&self) -> usize {
        self.target.saturating_sub(self.accepted)
    }

    pub fn target_reached(&self) -> bool {
        self.accepted >= self.target
    }

    /// Loop-top stop check; `None` means another fetch is allowed.
    pub fn stop_reason(&self, safety_multiplier: usize, cancelled: bool) -> Option<StopReason> {
        if cancelled {
            Some(StopReason::Cancelled)
        } else if self.target_reached() {
            Some(StopReason::TargetReached)
        } else if self.exhausted {
            Some(StopReason::Exhausted)
        } else if self.candidates_checked >= (self.target as u64).saturating_mul(safety_multiplier as u64) {
            Some(StopReason::SafetyCeiling)
        } else {
            None
        }
    }

    /// `clamp(ceil(remaining * oversample), min, max)`.
    pub fn next_fetch_size(&self, oversample_factor: f64, min_batch: usize, max_batch: usize) -> usize {
        let wanted = (self.remaining() as f64 * oversample_factor).ceil();
        let wanted = if wanted.is_finite() && wanted > 0.0 {
            wanted as usize
        } else {
            0
        };
        wanted.clamp(min_batch, max_batch.max(min_batch))
    }

    pub fn record_fetch(&mut self, requested: usize, returned: usize) {
        self.offset += requested;
        self.total_fetched += returned as u64;
        self.candidates_checked += returned as u64;
    }

    pub fn record_pre_filtered(&mut self, count: u64) {
        if count == 0 {
            return;
        }
        self.pre_filtered += count;
        *self
            .status_breakdown
            .entry("pre_filtered".to_string())
            .or_insert(0) += count;
    }

    /// Counts one verification outcome globally and for the candidate's source.
    pub fn record_status(
        &mut self,
        candidate: &NormalizedCandidate,
        status: VerificationStatus,
        from_cache: bool,
    ) {
        *self
            .status_breakdown
            .entry(status.as_str().to_string())
            .or_insert(0) += 1;
        if from_cache {
            self.cached += 1;
            *self.status_breakdown.entry("cached".to_string()).or_insert(0) += 1;
        }
        self.source_stats
            .entry(candidate.source_key().to_string())
            .or_default()
            .record(status);
        if self.audit_sample.len() < AUDIT_SAMPLE_CAP {
            self.audit_sample
                .push(AuditRow::new(candidate, status, from_cache));
        }
    }
}
