//! The pipeline orchestrator.
//!
//! A [`Pipeline`] owns the injected batch adapter, prompt templates and
//! runtime settings. Its three entry points live in sibling modules:
//!
//! - [`Pipeline::enqueue`] (`enqueue.rs`): discovery → interest batch
//! - [`Pipeline::advance_interest`] (`interest.rs`): interest batch → summary batch
//! - [`Pipeline::advance_delivery`] (`delivery.rs`): summaries → notifications
//!
//! Every entry point loads the whole state document, advances each eligible
//! job by at most one step, and saves the document only if a job changed.

use chrono::{DateTime, Utc};
use paperpipe_batch::BatchClient;
use paperpipe_notify::Notifier;
use paperpipe_shared::{
    JobEntry, JobStatus, PipelineJob, PipelineSettings, Result, StateDocument,
};
use paperpipe_storage::StateStore;
use tracing::{info, warn};

use crate::prompts::PromptSet;

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before a job is advanced.
    fn job_started(&self, pipeline_id: &str, status: &JobStatus);
    /// Called after each item post attempt during delivery.
    fn item_posted(&self, current: usize, total: usize);
    /// Called when the entry point completes.
    fn done(&self, report: &AdvanceReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn job_started(&self, _pipeline_id: &str, _status: &JobStatus) {}
    fn item_posted(&self, _current: usize, _total: usize) {}
    fn done(&self, _report: &AdvanceReport) {}
}

/// What one advance invocation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvanceReport {
    /// Jobs in a status handled by the entry point.
    pub examined: usize,
    /// Jobs whose record changed.
    pub changed: usize,
    /// Jobs that reached a terminal status during this run.
    pub finalized: usize,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Stateless orchestrator over injected adapters. All state lives in the
/// [`StateStore`] passed to each entry point.
pub struct Pipeline<'a> {
    pub(crate) batch: &'a dyn BatchClient,
    pub(crate) prompts: PromptSet,
    pub(crate) settings: PipelineSettings,
    pub(crate) progress: &'a dyn ProgressReporter,
}

impl<'a> Pipeline<'a> {
    pub fn new(batch: &'a dyn BatchClient, prompts: PromptSet, settings: PipelineSettings) -> Self {
        Self {
            batch,
            prompts,
            settings,
            progress: &SilentProgress,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Whether a batch started at `since` has outlived the timeout.
    pub(crate) fn timed_out(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - since > self.settings.batch_timeout
    }

    /// Give up on a batch that ran too long: cancel it if the adapter can,
    /// then park the job in `fallback` so the synchronous path runs next.
    pub(crate) async fn abandon_batch(
        &self,
        job: &mut PipelineJob,
        handle: &str,
        fallback: JobStatus,
        now: DateTime<Utc>,
    ) {
        let hours = self.settings.batch_timeout.num_minutes() as f64 / 60.0;
        warn!(
            pipeline_id = %job.pipeline_id,
            handle,
            hours,
            "batch timed out, switching to synchronous fallback"
        );

        let cancel_error = if self.batch.supports_cancel() {
            match self.batch.cancel(handle).await {
                Ok(()) => None,
                Err(e) => {
                    warn!(handle, error = %e, "failed to cancel timed-out batch");
                    Some(e.to_string())
                }
            }
        } else {
            Some("cancellation unsupported".to_string())
        };

        job.status = fallback;
        job.last_error = cancel_error
            .map(|reason| format!("batch {handle} timed out after {hours:.1}h ({reason})"));
        job.touch(now);
    }

    /// Shared driver for the two advance entry points: load, step every job
    /// the stage handles, save if anything changed.
    pub(crate) async fn advance_each(
        &self,
        store: &StateStore,
        stage: Stage<'_>,
        now: DateTime<Utc>,
    ) -> Result<AdvanceReport> {
        self.progress.phase(stage.phase_name());
        let mut state = store.load()?;
        let mut report = AdvanceReport::default();

        for index in 0..state.jobs.len() {
            let Some(mut job) = job_at(&state, index)
                .filter(|j| stage.handles(&j.status))
                .cloned()
            else {
                continue;
            };
            report.examined += 1;
            self.progress.job_started(job.pipeline_id.as_str(), &job.status);

            let before = job.clone();
            match stage {
                Stage::Interest => self.step_interest(&mut job, now).await,
                Stage::Delivery(notifier) => {
                    let mut checkpoint = Checkpoint {
                        store,
                        state: &mut state,
                        index,
                    };
                    self.step_delivery(&mut job, notifier, &mut checkpoint, now)
                        .await?;
                }
            }

            if job != before {
                report.changed += 1;
                if job.is_terminal() {
                    report.finalized += 1;
                }
                info!(
                    pipeline_id = %job.pipeline_id,
                    from = %before.status,
                    to = %job.status,
                    "job advanced"
                );
                state.jobs[index] = JobEntry::Job(Box::new(job));
            }
        }

        if report.changed > 0 {
            store.save(&state)?;
        }
        self.progress.done(&report);
        Ok(report)
    }
}

/// Which entry point is driving [`Pipeline::advance_each`].
#[derive(Clone, Copy)]
pub(crate) enum Stage<'n> {
    Interest,
    Delivery(&'n dyn Notifier),
}

impl Stage<'_> {
    fn handles(&self, status: &JobStatus) -> bool {
        match self {
            Self::Interest => status.is_interest_stage(),
            Self::Delivery(_) => status.is_delivery_stage(),
        }
    }

    fn phase_name(&self) -> &'static str {
        match self {
            Self::Interest => "Advancing relevance checks",
            Self::Delivery(_) => "Advancing summaries and delivery",
        }
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Writes a job's in-progress record through to the store mid-step, so
/// progress survives a crash before the final save.
pub(crate) struct Checkpoint<'s> {
    store: &'s StateStore,
    state: &'s mut StateDocument,
    index: usize,
}

impl Checkpoint<'_> {
    pub(crate) fn save(&mut self, job: &PipelineJob) -> Result<()> {
        self.state.jobs[self.index] = JobEntry::Job(Box::new(job.clone()));
        self.store.save(self.state)
    }
}

fn job_at(state: &StateDocument, index: usize) -> Option<&PipelineJob> {
    match state.jobs.get(index)? {
        JobEntry::Job(job) => Some(job),
        JobEntry::Opaque(_) => None,
    }
}
