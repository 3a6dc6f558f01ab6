//! Asynchronous batch inference.
//!
//! This crate provides:
//! - [`BatchClient`]: submit / poll / cancel a batch job, or run one request
//!   synchronously as a fallback
//! - [`GeminiBatchClient`]: the Gemini API implementation

mod gemini;

use async_trait::async_trait;
use paperpipe_shared::{PipelineError, Result};

pub use gemini::{GeminiBatchClient, GeminiOptions};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Which pass a request belongs to. Selects model and response schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Relevance filter; answers `{"interested_in": bool}`.
    InterestCheck,
    /// Summary; answers `{"title", "summary", "keywords", "appendix"}`.
    Summarize,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InterestCheck => "interest_check",
            Self::Summarize => "summarize",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single prompt in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    /// Caller's key for the item (the document id).
    pub key: String,
    /// Full prompt text.
    pub prompt: String,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Coarse lifecycle of a remote batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    /// Queued or running.
    Running,
    /// Finished successfully; responses are available.
    Succeeded,
    /// Finished without success (failed, cancelled, expired).
    Ended,
}

/// Result of one poll.
#[derive(Debug, Clone)]
pub struct BatchStatus {
    /// Remote state name as reported, e.g. `BATCH_STATE_RUNNING`.
    pub state: String,
    pub phase: BatchPhase,
    /// Response text per submitted item, by position. `None` where the
    /// service returned an error or nothing for that item.
    pub responses: Vec<Option<String>>,
}

impl BatchStatus {
    pub fn running(state: impl Into<String>) -> Self {
        let state = state.into();
        Self {
            phase: classify_state(&state),
            state,
            responses: Vec::new(),
        }
    }
}

/// Map a remote state name to a phase. Both `BATCH_STATE_*` and the SDK's
/// `JOB_STATE_*` spellings are accepted; anything unrecognized counts as
/// still running so it is re-polled (and eventually times out).
pub fn classify_state(state: &str) -> BatchPhase {
    let name = state
        .trim()
        .trim_start_matches("BATCH_STATE_")
        .trim_start_matches("JOB_STATE_");
    match name {
        "SUCCEEDED" => BatchPhase::Succeeded,
        "FAILED" | "CANCELLED" | "EXPIRED" => BatchPhase::Ended,
        _ => BatchPhase::Running,
    }
}

// ---------------------------------------------------------------------------
// BatchClient
// ---------------------------------------------------------------------------

/// Asynchronous batch inference service.
#[async_trait]
pub trait BatchClient: Send + Sync {
    /// Submit all items as one batch; returns the job handle.
    async fn submit(&self, kind: TaskKind, items: &[BatchItem]) -> Result<String>;

    /// Fetch the current state of a batch job.
    async fn poll(&self, handle: &str) -> Result<BatchStatus>;

    /// Whether [`BatchClient::cancel`] does anything. Fixed per client.
    fn supports_cancel(&self) -> bool {
        false
    }

    /// Request cancellation of a batch job. Best-effort.
    async fn cancel(&self, handle: &str) -> Result<()> {
        Err(PipelineError::Batch(format!(
            "cancellation not supported for {handle}"
        )))
    }

    /// Run one request synchronously; returns the response text.
    async fn run_sync(&self, kind: TaskKind, item: &BatchItem) -> Result<String>;
}
