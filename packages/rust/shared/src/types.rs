//! Core domain types for lead-generation jobs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LeadGenError, Result};

/// Smallest accepted lead limit.
pub const MIN_LEAD_LIMIT: u32 = 5;

/// Largest accepted lead limit.
pub const MAX_LEAD_LIMIT: u32 = 100;

/// Lead limit used when the submission omits one.
pub const DEFAULT_LEAD_LIMIT: u32 = 50;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// Opaque, unguessable job handle (random UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a fresh random job identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// LeadQuery
// ---------------------------------------------------------------------------

/// A validated submission: what to search for and how many leads to keep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadQuery {
    pub industry: String,
    pub location: String,
    pub limit: u32,
}

impl LeadQuery {
    /// Validate raw submission fields.
    ///
    /// `industry` and `location` are trimmed and must be non-empty; `limit`
    /// defaults to [`DEFAULT_LEAD_LIMIT`] and must lie in
    /// [`MIN_LEAD_LIMIT`]..=[`MAX_LEAD_LIMIT`].
    pub fn new(industry: &str, location: &str, limit: Option<u32>) -> Result<Self> {
        let industry = industry.trim();
        let location = location.trim();

        if industry.is_empty() {
            return Err(LeadGenError::validation("industry is required"));
        }
        if location.is_empty() {
            return Err(LeadGenError::validation("location is required"));
        }

        let limit = limit.unwrap_or(DEFAULT_LEAD_LIMIT);
        if !(MIN_LEAD_LIMIT..=MAX_LEAD_LIMIT).contains(&limit) {
            return Err(LeadGenError::validation(format!(
                "limit must be between {MIN_LEAD_LIMIT} and {MAX_LEAD_LIMIT}, got {limit}"
            )));
        }

        Ok(Self {
            industry: industry.to_string(),
            location: location.to_string(),
            limit,
        })
    }

    /// The combined search phrase sent to the map-search provider.
    pub fn phrase(&self) -> String {
        format!("{} in {}", self.industry, self.location)
    }
}

// ---------------------------------------------------------------------------
// Job state machine
// ---------------------------------------------------------------------------

/// Lifecycle state of a job. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for JobState {
    type Err = LeadGenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(LeadGenError::parse(format!("unknown job state '{other}'"))),
        }
    }
}

/// Pipeline stage a running job is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Discovery,
    Extraction,
    Verification,
    Delivery,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Extraction => "extraction",
            Self::Verification => "verification",
            Self::Delivery => "delivery",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = LeadGenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "discovery" => Ok(Self::Discovery),
            "extraction" => Ok(Self::Extraction),
            "verification" => Ok(Self::Verification),
            "delivery" => Ok(Self::Delivery),
            other => Err(LeadGenError::parse(format!("unknown stage '{other}'"))),
        }
    }
}

/// Why a job ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobErrorKind {
    DiscoveryUnavailable,
    DeliveryFailed,
    Aborted,
    TimedOut,
    Internal,
}

impl JobErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DiscoveryUnavailable => "DiscoveryUnavailable",
            Self::DeliveryFailed => "DeliveryFailed",
            Self::Aborted => "Aborted",
            Self::TimedOut => "TimedOut",
            Self::Internal => "Internal",
        }
    }
}

impl FromStr for JobErrorKind {
    type Err = LeadGenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "DiscoveryUnavailable" => Ok(Self::DiscoveryUnavailable),
            "DeliveryFailed" => Ok(Self::DeliveryFailed),
            "Aborted" => Ok(Self::Aborted),
            "TimedOut" => Ok(Self::TimedOut),
            "Internal" => Ok(Self::Internal),
            other => Err(LeadGenError::parse(format!("unknown error kind '{other}'"))),
        }
    }
}

/// Job-level failure summary stored on the job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

/// A lead-generation job as persisted by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub query: LeadQuery,
    pub state: JobState,
    /// Meaningful only while `state == Running`.
    pub current_stage: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<JobError>,
    pub result_locator: Option<String>,
    /// Failed job whose verified leads seeded this one (delivery retry).
    pub resumed_from: Option<JobId>,
    /// Destination sheet/tab chosen at submission, if any.
    pub worksheet: Option<String>,
}

impl Job {
    /// The caller-facing status record.
    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.id.clone(),
            status: self.state,
            stage: match self.state {
                JobState::Running => self.current_stage,
                _ => None,
            },
            result_locator: self.result_locator.clone(),
            error: self.error.as_ref().map(|e| e.message.clone()),
            error_kind: self.error.as_ref().map(|e| e.kind),
        }
    }
}

/// Response of the status query interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_locator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<JobErrorKind>,
}

// ---------------------------------------------------------------------------
// Stage records
// ---------------------------------------------------------------------------

/// A business returned by the discovery provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessRecord {
    pub name: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_count: Option<u32>,
}

impl BusinessRecord {
    /// Normalized `(name, address)` pair used for deduplication.
    pub fn dedup_key(&self) -> (String, String) {
        (normalize_key(&self.name), normalize_key(&self.address))
    }

    /// The website, if present and non-blank.
    pub fn website(&self) -> Option<&str> {
        self.website
            .as_deref()
            .map(str::trim)
            .filter(|w| !w.is_empty())
    }
}

/// Lowercase, drop punctuation, collapse whitespace.
fn normalize_key(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Where an email candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateSource {
    PageScan,
    MailtoLink,
    PatternGuess,
}

impl CandidateSource {
    /// Tie-break priority: `mailto-link > page-scan > pattern-guess`.
    pub fn priority(&self) -> u8 {
        match self {
            Self::MailtoLink => 2,
            Self::PageScan => 1,
            Self::PatternGuess => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailCandidate {
    pub address: String,
    pub source: CandidateSource,
    pub confidence: Confidence,
}

impl EmailCandidate {
    /// Ordering key; higher is better.
    pub fn rank(&self) -> (Confidence, u8) {
        (self.confidence, self.source.priority())
    }

    /// Domain part of the address, lowercased.
    pub fn domain(&self) -> Option<String> {
        self.address
            .rsplit_once('@')
            .map(|(_, d)| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
    }
}

/// Output of the extraction stage for one business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub business: BusinessRecord,
    pub candidates: Vec<EmailCandidate>,
}

impl ExtractionResult {
    /// Highest-ranked candidate, if any.
    pub fn best_candidate(&self) -> Option<&EmailCandidate> {
        self.candidates.iter().max_by_key(|c| c.rank())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationStatus {
    Verified,
    Unverified,
    CatchAll,
    NoEmail,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Unverified => "unverified",
            Self::CatchAll => "catch-all",
            Self::NoEmail => "no-email",
        }
    }
}

/// One business after verification; the unit persisted by delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedLead {
    pub business: BusinessRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// How `email` was found; guessed addresses are `pattern-guess`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_source: Option<CandidateSource>,
    pub verification_status: VerificationStatus,
}

impl VerifiedLead {
    pub fn no_email(business: BusinessRecord) -> Self {
        Self {
            business,
            email: None,
            email_source: None,
            verification_status: VerificationStatus::NoEmail,
        }
    }
}
