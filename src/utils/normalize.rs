//! Canonicalizes raw candidate rows before any filtering.

use crate::core::models::{CandidateRecord, GenderFilter, NormalizedCandidate};
use crate::utils::gender::GenderClassifier;
use std::fmt;

/// Why a raw candidate was dropped by the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MalformedEmail,
    MissingFirstName,
    GenderMismatch,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MalformedEmail => write!(f, "malformed email"),
            Rejection::MissingFirstName => write!(f, "missing first name"),
            Rejection::GenderMismatch => write!(f, "gender filter mismatch"),
        }
    }
}

/// Reduces a possibly comma-joined email field to one trimmed, lowercase address.
/// Returns `None` unless the result contains exactly one `@`.
pub(crate) fn canonical_email(raw: &str) -> Option<String> {
    let first = raw.split(',').next().unwrap_or("").trim().to_lowercase();
    if first.matches('@').count() == 1 {
        Some(first)
    } else {
        None
    }
}

fn field(value: &Option<String>) -> String {
    value.as_deref().unwrap_or("").trim().to_string()
}

/// Turns a raw record into a `NormalizedCandidate` or says why it was rejected.
pub(crate) fn normalize_candidate(
    record: &CandidateRecord,
    classifier: &dyn GenderClassifier,
    gender_filter: GenderFilter,
) -> std::result::Result<NormalizedCandidate, Rejection> {
    let email = record
        .email
        .as_deref()
        .and_then(canonical_email)
        .ok_or(Rejection::MalformedEmail)?;

    let first_name = field(&record.first_name);
    if first_name.is_empty() {
        return Err(Rejection::MissingFirstName);
    }

    let gender = classifier.classify(&first_name);
    if !gender_filter.admits(gender) {
        return Err(Rejection::GenderMismatch);
    }

    Ok(NormalizedCandidate {
        email,
        first_name,
        last_name: field(&record.last_name),
        gender,
        company: field(&record.company),
        source: field(&record.source),
        source_detail: field(&record.source_detail),
        job_title: field(&record.job_title),
        industry: field(&record.industry),
        location: field(&record.location),
        company_domain: field(&record.company_domain),
        profile_url: field(&record.profile_url),
    })
}
