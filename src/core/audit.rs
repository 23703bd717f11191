//! Per-run sample of verification outcomes, written as CSV for spot checks.

use crate::core::models::{NormalizedCandidate, VerificationStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Outcomes kept per run.
pub const AUDIT_SAMPLE_CAP: usize = 200;

/// One sampled verification outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRow {
    pub email: String,
    pub source: String,
    #[serde(rename = "reoon_status")]
    pub status: VerificationStatus,
    pub cached: bool,
}

impl AuditRow {
    pub fn new(candidate: &NormalizedCandidate, status: VerificationStatus, cached: bool) -> Self {
        Self {
            email: candidate.email.clone(),
            source: candidate.source.clone(),
            status,
            cached,
        }
    }
}

/// List names become file-name safe: anything outside `[A-Za-z0-9_-]` is `_`.
pub fn sample_file_name(list_name: &str, at: DateTime<Utc>) -> String {
    let safe: String = list_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_{}.csv", safe, at.format("%Y-%m-%dT%H-%M-%S-%3fZ"))
}

/// Writes `rows` under `dir`, creating it if needed. Returns the full path.
pub fn write_sample(
    dir: &Path,
    list_name: &str,
    rows: &[AuditRow],
    at: DateTime<Utc>,
) -> Result<PathBuf, csv::Error> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(sample_file_name(list_name, at));
    let mut writer = csv::Writer::from_path(&path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(path)
}
