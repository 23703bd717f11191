//! Data model for candidates, accepted leads, and suppression entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One raw row from the candidate source.
///
/// Field names follow the source table's snake_case columns; a few camelCase
/// aliases are accepted because older exports used them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "firstName")]
    pub first_name: Option<String>,
    #[serde(default, alias = "lastName")]
    pub last_name: Option<String>,
    #[serde(default, alias = "company_name")]
    pub company: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub source_detail: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub company_domain: Option<String>,
    #[serde(default, alias = "linkedin_url")]
    pub profile_url: Option<String>,
}

/// Gender label inferred from a first name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Unknown,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Unknown => "unknown",
        }
    }
}

/// Caller-selected gender restriction for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GenderFilter {
    #[default]
    All,
    Male,
    Female,
}

impl GenderFilter {
    pub fn admits(&self, gender: Gender) -> bool {
        match self {
            GenderFilter::All => true,
            GenderFilter::Male => gender == Gender::Male,
            GenderFilter::Female => gender == Gender::Female,
        }
    }
}

impl FromStr for GenderFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "all" => Ok(GenderFilter::All),
            "male" | "men" => Ok(GenderFilter::Male),
            "female" | "women" => Ok(GenderFilter::Female),
            other => Err(format!(
                "Unknown gender filter '{}'. Expected All, male or female.",
                other
            )),
        }
    }
}

impl fmt::Display for GenderFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenderFilter::All => write!(f, "All"),
            GenderFilter::Male => write!(f, "male"),
            GenderFilter::Female => write!(f, "female"),
        }
    }
}

/// A candidate whose email has been canonicalized and gender inferred.
///
/// `email` always holds exactly one `@` and is lowercase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedCandidate {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub gender: Gender,
    pub company: String,
    pub source: String,
    pub source_detail: String,
    pub job_title: String,
    pub industry: String,
    pub location: String,
    pub company_domain: String,
    pub profile_url: String,
}

impl NormalizedCandidate {
    /// Source identifier used for per-source statistics.
    pub fn source_key(&self) -> &str {
        if self.source.is_empty() {
            "unknown"
        } else {
            &self.source
        }
    }
}

/// Quality classification returned by the verification service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Safe,
    Invalid,
    CatchAll,
    Risky,
    Unknown,
    Disabled,
    Error,
    Unverified,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Safe => "safe",
            VerificationStatus::Invalid => "invalid",
            VerificationStatus::CatchAll => "catch_all",
            VerificationStatus::Risky => "risky",
            VerificationStatus::Unknown => "unknown",
            VerificationStatus::Disabled => "disabled",
            VerificationStatus::Error => "error",
            VerificationStatus::Unverified => "unverified",
        }
    }

    /// Maps a raw service status onto the closed status set.
    ///
    /// Service-specific risk labels collapse into `Risky`; anything
    /// unrecognized is `Unknown`.
    pub fn from_service(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "safe" | "valid" => VerificationStatus::Safe,
            "invalid" => VerificationStatus::Invalid,
            "catch_all" | "catch-all" | "catchall" => VerificationStatus::CatchAll,
            "risky" | "disposable" | "role_account" | "spamtrap" | "inbox_full" => {
                VerificationStatus::Risky
            }
            "disabled" => VerificationStatus::Disabled,
            "error" => VerificationStatus::Error,
            "unverified" => VerificationStatus::Unverified,
            _ => VerificationStatus::Unknown,
        }
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "safe" => Ok(VerificationStatus::Safe),
            "invalid" => Ok(VerificationStatus::Invalid),
            "catch_all" => Ok(VerificationStatus::CatchAll),
            "risky" => Ok(VerificationStatus::Risky),
            "unknown" => Ok(VerificationStatus::Unknown),
            "disabled" => Ok(VerificationStatus::Disabled),
            "error" => Ok(VerificationStatus::Error),
            "unverified" => Ok(VerificationStatus::Unverified),
            other => Err(format!("Unknown verification status '{}'", other)),
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate that survived filtering, dedup and verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedLead {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub gender: Gender,
    pub company: String,
    pub source: String,
    pub source_detail: String,
    pub job_title: String,
    pub industry: String,
    pub location: String,
    pub company_domain: String,
    pub profile_url: String,
    pub list_tag: String,
    pub verified_status: VerificationStatus,
    pub verified_at: Option<DateTime<Utc>>,
    /// Reserved for the downstream push integration, which is disabled.
    pub pushed_downstream: bool,
}

impl AcceptedLead {
    pub fn from_candidate(
        candidate: NormalizedCandidate,
        list_tag: &str,
        status: VerificationStatus,
        verified_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            email: candidate.email,
            first_name: candidate.first_name,
            last_name: candidate.last_name,
            gender: candidate.gender,
            company: candidate.company,
            source: candidate.source,
            source_detail: candidate.source_detail,
            job_title: candidate.job_title,
            industry: candidate.industry,
            location: candidate.location,
            company_domain: candidate.company_domain,
            profile_url: candidate.profile_url,
            list_tag: list_tag.to_string(),
            verified_status: status,
            verified_at,
            pushed_downstream: false,
        }
    }
}

/// Where a suppression entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuppressionSource {
    Uploaded,
    SyncedFromLeads,
}

impl SuppressionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressionSource::Uploaded => "uploaded",
            SuppressionSource::SyncedFromLeads => "synced-from-leads",
        }
    }
}

impl FromStr for SuppressionSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(SuppressionSource::Uploaded),
            "synced-from-leads" => Ok(SuppressionSource::SyncedFromLeads),
            other => Err(format!("Unknown suppression provenance '{}'", other)),
        }
    }
}

/// A verification result remembered for reuse by later runs.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationRecord {
    pub email: String,
    pub status: VerificationStatus,
    pub verified_at: DateTime<Utc>,
}

/// Suppression set size, in total and per provenance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuppressionStats {
    pub total: u64,
    pub by_source: Vec<(String, u64)>,
}

/// Number of stored leads under one list tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListStats {
    pub list_tag: String,
    pub total: u64,
}

/// Parameters of one list-generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub list_name: String,
    pub gender: GenderFilter,
    pub target: usize,
    pub industry: Option<String>,
}

impl RunRequest {
    pub fn new(list_name: impl Into<String>, target: usize) -> Self {
        Self {
            list_name: list_name.into(),
            gender: GenderFilter::All,
            target,
            industry: None,
        }
    }

    pub fn with_gender(mut self, gender: GenderFilter) -> Self {
        self.gender = gender;
        self
    }

    pub fn with_industry(mut self, industry: impl Into<String>) -> Self {
        let industry = industry.into();
        self.industry = if industry.trim().is_empty() {
            None
        } else {
            Some(industry.trim().to_string())
        };
        self
    }
}
