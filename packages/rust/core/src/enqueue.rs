//! Discovery → interest batch.

use chrono::{DateTime, Utc};
use paperpipe_batch::TaskKind;
use paperpipe_discovery::DocumentSource;
use paperpipe_shared::{PipelineError, PipelineId, PipelineJob, Result};
use paperpipe_storage::StateStore;
use tracing::{info, instrument};

use crate::pipeline::Pipeline;

/// Result of an [`Pipeline::enqueue`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Discovery found nothing; no batch submitted, no job recorded.
    NoCandidates,
    /// A new job was recorded.
    Enqueued {
        pipeline_id: PipelineId,
        documents: usize,
        handle: String,
    },
}

impl Pipeline<'_> {
    /// Fetch candidates, submit them as one relevance batch and record a new
    /// job in `interest_submitted`.
    ///
    /// Fails without recording anything when discovery fails or the batch
    /// service hands back no job handle.
    #[instrument(skip_all, fields(source = source.name()))]
    pub async fn enqueue(
        &self,
        source: &dyn DocumentSource,
        store: &StateStore,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome> {
        self.progress.phase("Discovering documents");
        let documents = source.fetch_candidates().await?;
        if documents.is_empty() {
            info!("no candidate documents, nothing to enqueue");
            return Ok(EnqueueOutcome::NoCandidates);
        }

        self.progress
            .phase(&format!("Submitting {} documents for relevance check", documents.len()));
        let items: Vec<_> = documents
            .iter()
            .map(|d| self.prompts.interest_item(d))
            .collect();
        let handle = self.batch.submit(TaskKind::InterestCheck, &items).await?;
        if handle.trim().is_empty() {
            return Err(PipelineError::Batch(
                "interest batch submission returned no job handle".into(),
            ));
        }

        let count = documents.len();
        let job = PipelineJob::new(documents, handle.clone(), now);
        let pipeline_id = job.pipeline_id.clone();
        // Other entry points may have saved while discovery and submission ran.
        let mut state = store.load()?;
        state.push_job(job);
        store.save(&state)?;

        info!(%pipeline_id, documents = count, %handle, "pipeline enqueued");
        Ok(EnqueueOutcome::Enqueued {
            pipeline_id,
            documents: count,
            handle,
        })
    }
}
