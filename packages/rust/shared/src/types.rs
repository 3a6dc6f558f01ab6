//! Core domain types: documents, summaries, pipeline jobs, and the persisted
//! state document.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Current schema version of the persisted state document.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

// ---------------------------------------------------------------------------
// PipelineId
// ---------------------------------------------------------------------------

/// Pipeline identifier: a UTC timestamp prefix plus a short random suffix,
/// e.g. `20250114T083000Z-3f9a1c2e`. Sorts roughly by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(pub String);

impl PipelineId {
    /// Generate a new identifier for a pipeline created at `now`.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", now.format("%Y%m%dT%H%M%SZ"), &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PipelineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Document / SummaryRecord
// ---------------------------------------------------------------------------

/// A discovered document (e.g. one arXiv paper).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier (for arXiv: the entry id URL).
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Abstract or body text fed to the prompts.
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    /// Link shown in notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A generated summary for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub appendix: Option<String>,
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// State-machine state of a pipeline job.
///
/// Serialized as its snake_case name. Unrecognized names survive a
/// load/save cycle as [`JobStatus::Unknown`] and are never advanced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    InterestSubmitted,
    InterestRunning,
    InterestFallbackRunning,
    SummarizeSubmitted,
    SummarizeRunning,
    SummaryFallbackRunning,
    SendFailed,
    Completed,
    CompletedNoInterests,
    Failed,
    Unknown(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::InterestSubmitted => "interest_submitted",
            Self::InterestRunning => "interest_running",
            Self::InterestFallbackRunning => "interest_fallback_running",
            Self::SummarizeSubmitted => "summarize_submitted",
            Self::SummarizeRunning => "summarize_running",
            Self::SummaryFallbackRunning => "summary_fallback_running",
            Self::SendFailed => "send_failed",
            Self::Completed => "completed",
            Self::CompletedNoInterests => "completed_no_interests",
            Self::Failed => "failed",
            Self::Unknown(raw) => raw,
        }
    }

    /// Terminal states are never mutated again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedNoInterests | Self::Failed
        )
    }

    /// States handled by the interest-advance entry point.
    pub fn is_interest_stage(&self) -> bool {
        matches!(
            self,
            Self::InterestSubmitted | Self::InterestRunning | Self::InterestFallbackRunning
        )
    }

    /// States handled by the delivery-advance entry point.
    pub fn is_delivery_stage(&self) -> bool {
        matches!(
            self,
            Self::SummarizeSubmitted
                | Self::SummarizeRunning
                | Self::SummaryFallbackRunning
                | Self::SendFailed
        )
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Unknown(String::new())
    }
}

impl From<String> for JobStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "interest_submitted" => Self::InterestSubmitted,
            "interest_running" => Self::InterestRunning,
            "interest_fallback_running" => Self::InterestFallbackRunning,
            "summarize_submitted" => Self::SummarizeSubmitted,
            "summarize_running" => Self::SummarizeRunning,
            "summary_fallback_running" => Self::SummaryFallbackRunning,
            "send_failed" => Self::SendFailed,
            "completed" => Self::Completed,
            "completed_no_interests" => Self::CompletedNoInterests,
            "failed" => Self::Failed,
            _ => Self::Unknown(raw),
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Unknown(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PipelineJob
// ---------------------------------------------------------------------------

fn default_timestamp() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// One discovery round's tracked progress through interest filtering,
/// summarization, and delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineJob {
    pub pipeline_id: PipelineId,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub interest_job_handle: Option<String>,
    #[serde(default)]
    pub summary_job_handle: Option<String>,
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub interested_ids: Vec<String>,
    #[serde(default)]
    pub summaries: BTreeMap<String, SummaryRecord>,
    #[serde(default)]
    pub sent_ids: Vec<String>,
    #[serde(default)]
    pub notification_sent: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default = "default_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub finalized_at: Option<DateTime<Utc>>,
    /// Fields written by newer or foreign tooling, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PipelineJob {
    /// Create a freshly enqueued job waiting on its interest batch.
    pub fn new(documents: Vec<Document>, interest_handle: String, now: DateTime<Utc>) -> Self {
        Self {
            pipeline_id: PipelineId::generate(now),
            status: JobStatus::InterestSubmitted,
            interest_job_handle: Some(interest_handle),
            summary_job_handle: None,
            documents,
            interested_ids: Vec::new(),
            summaries: BTreeMap::new(),
            sent_ids: Vec::new(),
            notification_sent: false,
            retry_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            finalized_at: None,
            extra: Map::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Interest batch handle, if one was recorded and is non-empty.
    pub fn interest_handle(&self) -> Option<&str> {
        self.interest_job_handle.as_deref().filter(|h| !h.is_empty())
    }

    /// Summary batch handle, if one was recorded and is non-empty.
    pub fn summary_handle(&self) -> Option<&str> {
        self.summary_job_handle.as_deref().filter(|h| !h.is_empty())
    }

    /// Interested documents, in original document order.
    pub fn interested_documents(&self) -> Vec<&Document> {
        let wanted: HashSet<&str> = self.interested_ids.iter().map(String::as_str).collect();
        self.documents
            .iter()
            .filter(|d| wanted.contains(d.id.as_str()))
            .collect()
    }

    /// Interested documents that do not have a summary yet, in document order.
    pub fn documents_missing_summary(&self) -> Vec<&Document> {
        self.interested_documents()
            .into_iter()
            .filter(|d| !self.summaries.contains_key(&d.id))
            .collect()
    }

    /// Ids that are interested, summarized, and not yet sent, in document order.
    pub fn pending_delivery_ids(&self) -> Vec<String> {
        let sent: HashSet<&str> = self.sent_ids.iter().map(String::as_str).collect();
        self.interested_documents()
            .into_iter()
            .filter(|d| self.summaries.contains_key(&d.id) && !sent.contains(d.id.as_str()))
            .map(|d| d.id.clone())
            .collect()
    }

    /// `sent_ids ⊆ interested_ids` always holds, so size equality means every
    /// interested document has been delivered.
    pub fn is_fully_delivered(&self) -> bool {
        self.sent_ids.len() == self.interested_ids.len()
    }

    /// Add summaries for interested documents that have none yet.
    /// Existing entries are never overwritten. Returns how many were added.
    pub fn merge_summaries(
        &mut self,
        incoming: impl IntoIterator<Item = (String, SummaryRecord)>,
    ) -> usize {
        let mut added = 0;
        for (id, summary) in incoming {
            if !self.interested_ids.contains(&id) || self.summaries.contains_key(&id) {
                continue;
            }
            self.summaries.insert(id, summary);
            added += 1;
        }
        added
    }

    /// Record a successful delivery. Returns `false` if the id was already
    /// sent or is not eligible for delivery.
    pub fn mark_sent(&mut self, id: &str) -> bool {
        if !self.summaries.contains_key(id) || self.sent_ids.iter().any(|s| s == id) {
            return false;
        }
        self.sent_ids.push(id.to_string());
        true
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Move to a terminal state, stamping `finalized_at` exactly once.
    pub fn finalize(&mut self, status: JobStatus, now: DateTime<Utc>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.updated_at = now;
        if self.finalized_at.is_none() {
            self.finalized_at = Some(now);
        }
    }

    /// Count a fallback or delivery failure and remember why.
    pub fn record_failure(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(reason.into());
        self.updated_at = now;
    }

    /// Check `sent_ids ⊆ summaries ⊆ interested_ids ⊆ document ids`.
    /// Returns a description of every violation found.
    pub fn invariant_violations(&self) -> Vec<String> {
        let doc_ids: HashSet<&str> = self.documents.iter().map(|d| d.id.as_str()).collect();
        let interested: HashSet<&str> = self.interested_ids.iter().map(String::as_str).collect();

        let mut violations = Vec::new();
        for id in &self.interested_ids {
            if !doc_ids.contains(id.as_str()) {
                violations.push(format!("interested id {id} is not a document"));
            }
        }
        for id in self.summaries.keys() {
            if !interested.contains(id.as_str()) {
                violations.push(format!("summary for {id} which is not interested"));
            }
        }
        for id in &self.sent_ids {
            if !self.summaries.contains_key(id) {
                violations.push(format!("sent id {id} has no summary"));
            }
        }
        violations
    }
}

// ---------------------------------------------------------------------------
// StateDocument
// ---------------------------------------------------------------------------

/// One entry of the persisted `jobs` array.
///
/// Entries that cannot be read as a [`PipelineJob`] are kept verbatim so a
/// save never drops data the loader did not understand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobEntry {
    Job(Box<PipelineJob>),
    Opaque(Value),
}

fn current_schema_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}

/// The whole persisted state: `{schema_version, jobs: [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub jobs: Vec<JobEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            jobs: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl StateDocument {
    /// Readable jobs, in store order.
    pub fn jobs(&self) -> impl Iterator<Item = &PipelineJob> {
        self.jobs.iter().filter_map(|entry| match entry {
            JobEntry::Job(job) => Some(job.as_ref()),
            JobEntry::Opaque(_) => None,
        })
    }

    /// Readable jobs, mutably, in store order.
    pub fn jobs_mut(&mut self) -> impl Iterator<Item = &mut PipelineJob> {
        self.jobs.iter_mut().filter_map(|entry| match entry {
            JobEntry::Job(job) => Some(job.as_mut()),
            JobEntry::Opaque(_) => None,
        })
    }

    pub fn push_job(&mut self, job: PipelineJob) {
        self.jobs.push(JobEntry::Job(Box::new(job)));
    }

    pub fn find_job(&self, pipeline_id: &str) -> Option<&PipelineJob> {
        self.jobs().find(|j| j.pipeline_id.as_str() == pipeline_id)
    }

    pub fn find_job_mut(&mut self, pipeline_id: &str) -> Option<&mut PipelineJob> {
        self.jobs_mut().find(|j| j.pipeline_id.as_str() == pipeline_id)
    }

    /// Number of entries kept verbatim because they could not be read.
    pub fn opaque_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|e| matches!(e, JobEntry::Opaque(_)))
            .count()
    }
}
