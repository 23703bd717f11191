//! Typed progress events and the emitter that delivers them in order.

use crate::core::run_state::{RunState, SourceStats};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Orchestrator phase reported in a `progress` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Fetching,
    Filtered,
    Verifying,
    Saving,
    Exhausted,
    ErrorInBatch,
}

/// Snapshot of the run counters at one phase transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub phase: Phase,
    pub batch: u32,
    pub clean: usize,
    pub target: usize,
    pub fetched: u64,
    #[serde(rename = "sent_to_reoon")]
    pub sent_to_verifier: u64,
    pub duplicates: u64,
    pub suppressed: u64,
    pub pre_filtered: u64,
    pub cached: u64,
    pub breakdown: BTreeMap<String, u64>,
    pub message: String,
}

impl ProgressSnapshot {
    pub fn capture(state: &RunState, phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase,
            batch: state.batch,
            clean: state.accepted,
            target: state.target,
            fetched: state.total_fetched,
            sent_to_verifier: state.sent_to_verifier,
            duplicates: state.duplicates,
            suppressed: state.suppressed,
            pre_filtered: state.pre_filtered,
            cached: state.cached,
            breakdown: state.status_breakdown.clone(),
            message: message.into(),
        }
    }
}

/// Final counters of a run as reported in the `done` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub total_fetched: u64,
    pub total_candidates_after_local_filter: u64,
    #[serde(rename = "totalSentToReoon")]
    pub total_sent_to_verifier: u64,
    pub total_verified_clean: usize,
    pub duplicates_skipped: u64,
    pub suppressed_skipped: u64,
    pub pre_filtered: u64,
    pub cached_hits: u64,
    pub candidates_checked: u64,
    pub status_breakdown: BTreeMap<String, u64>,
    pub source_stats: BTreeMap<String, SourceStats>,
    pub sample_csv_entries: usize,
    /// File name of the audit sample, when one was written.
    pub sample_csv_file: Option<String>,
    pub message: String,
}

/// Terminal summary of a run that produced a `done` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub success: bool,
    pub list_name: String,
    pub requested: usize,
    pub stats: RunStats,
    pub clean_leads: usize,
    pub persisted: usize,
    pub exhausted: bool,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn from_state(
        state: &RunState,
        list_name: &str,
        persisted: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            list_name: list_name.to_string(),
            requested: state.target,
            stats: RunStats {
                total_fetched: state.total_fetched,
                total_candidates_after_local_filter: state.after_local_filter,
                total_sent_to_verifier: state.sent_to_verifier,
                total_verified_clean: state.accepted,
                duplicates_skipped: state.duplicates,
                suppressed_skipped: state.suppressed,
                pre_filtered: state.pre_filtered,
                cached_hits: state.cached,
                candidates_checked: state.candidates_checked,
                status_breakdown: state.status_breakdown.clone(),
                source_stats: state.source_stats.clone(),
                sample_csv_entries: 0,
                sample_csv_file: None,
                message: message.into(),
            },
            clean_leads: state.accepted,
            persisted,
            exhausted: state.exhausted,
            cancelled: state.cancelled,
        }
    }

    pub fn with_audit_sample(mut self, entries: usize, file: Option<String>) -> Self {
        self.stats.sample_csv_entries = entries;
        self.stats.sample_csv_file = file;
        self
    }

    pub fn message(&self) -> &str {
        &self.stats.message
    }
}

/// One event on the progress channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Status { message: String },
    Progress(ProgressSnapshot),
    Done(RunSummary),
    Error { message: String },
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Done(_) | ProgressEvent::Error { .. })
    }

    /// One JSON object, no trailing newline.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Server-sent-events frame: `data: {json}\n\n`.
    pub fn to_sse_frame(&self) -> serde_json::Result<String> {
        Ok(format!("data: {}\n\n", self.to_json_line()?))
    }
}

/// Translates orchestrator transitions into events on an ordered channel.
///
/// Sending never fails the run. When the receiving side is gone the
/// attached cancellation token (if any) is triggered instead.
#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    tx: mpsc::UnboundedSender<ProgressEvent>,
    cancel_on_disconnect: Option<CancellationToken>,
}

impl ProgressEmitter {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self {
            tx,
            cancel_on_disconnect: None,
        }
    }

    /// Creates an emitter together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn cancel_on_disconnect(mut self, token: CancellationToken) -> Self {
        self.cancel_on_disconnect = Some(token);
        self
    }

    pub fn status(&self, message: impl Into<String>) {
        self.send(ProgressEvent::Status {
            message: message.into(),
        });
    }

    pub fn progress(&self, state: &RunState, phase: Phase, message: impl Into<String>) {
        self.send(ProgressEvent::Progress(ProgressSnapshot::capture(
            state, phase, message,
        )));
    }

    pub fn done(&self, summary: RunSummary) {
        self.send(ProgressEvent::Done(summary));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(ProgressEvent::Error {
            message: message.into(),
        });
    }

    fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!(target: "pipeline", "Progress receiver dropped; event discarded.");
            if let Some(ref token) = self.cancel_on_disconnect {
                if !token.is_cancelled() {
                    tracing::info!(target: "pipeline", "Progress channel closed by client, cancelling run.");
                    token.cancel();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_event_wire_format() {
        let mut state = RunState::new(50);
        state.total_fetched = 120;
        state.sent_to_verifier = 7;
        state.status_breakdown.insert("safe".into(), 3);
        let event = ProgressEvent::Progress(ProgressSnapshot::capture(
            &state,
            Phase::ErrorInBatch,
            "hello",
        ));
        let json: serde_json::Value = serde_json::from_str(&event.to_json_line().unwrap()).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["phase"], "error_in_batch");
        assert_eq!(json["sent_to_reoon"], 7);
        assert_eq!(json["fetched"], 120);
        assert_eq!(json["breakdown"]["safe"], 3);
    }

    #[test]
    fn test_done_event_wire_format() {
        let mut state = RunState::new(100);
        state.exhausted = true;
        let summary = RunSummary::from_state(&state, "q3-outreach", 0, "nothing left");
        let event = ProgressEvent::Done(summary);
        assert!(event.is_terminal());
        let frame = event.to_sse_frame().unwrap();
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));
        let json: serde_json::Value =
            serde_json::from_str(frame.trim_start_matches("data: ").trim()).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["listName"], "q3-outreach");
        assert_eq!(json["cleanLeads"], 0);
        assert_eq!(json["exhausted"], true);
        assert_eq!(json["stats"]["totalSentToReoon"], 0);
        assert_eq!(json["stats"]["message"], "nothing left");
        assert_eq!(json["stats"]["sampleCsvEntries"], 0);
        assert!(json["stats"]["sampleCsvFile"].is_null());
    }

    #[tokio::test]
    async fn test_dropped_receiver_cancels_token() {
        let token = CancellationToken::new();
        let (emitter, rx) = ProgressEmitter::channel();
        let emitter = emitter.cancel_on_disconnect(token.clone());
        drop(rx);
        emitter.status("anyone there?");
        assert!(token.is_cancelled());
    }
}
