//! Stage 1: relevance batch → summary batch.
//!
//! Jobs in `interest_submitted` / `interest_running` poll their relevance
//! batch; a batch that outlives the timeout (measured from `created_at`) is
//! abandoned for the synchronous fallback, which jobs in
//! `interest_fallback_running` run document by document.

use chrono::{DateTime, Utc};
use paperpipe_batch::{BatchItem, BatchPhase, TaskKind};
use paperpipe_shared::{JobStatus, PipelineJob, Result};
use paperpipe_storage::StateStore;
use tracing::{debug, info, instrument, warn};

use crate::pipeline::{AdvanceReport, Pipeline, Stage};
use crate::responses;

impl Pipeline<'_> {
    /// Advance every job waiting on its relevance pass by one step.
    #[instrument(skip_all, fields(now = %now))]
    pub async fn advance_interest(
        &self,
        store: &StateStore,
        now: DateTime<Utc>,
    ) -> Result<AdvanceReport> {
        self.advance_each(store, Stage::Interest, now).await
    }

    pub(crate) async fn step_interest(&self, job: &mut PipelineJob, now: DateTime<Utc>) {
        match job.status {
            JobStatus::InterestFallbackRunning => self.interest_fallback(job, now).await,
            _ => self.poll_interest(job, now).await,
        }
    }

    async fn poll_interest(&self, job: &mut PipelineJob, now: DateTime<Utc>) {
        let Some(handle) = job.interest_handle().map(str::to_owned) else {
            warn!(pipeline_id = %job.pipeline_id, "no interest batch handle, skipping");
            return;
        };

        let status = match self.batch.poll(&handle).await {
            Ok(status) => status,
            Err(e) => {
                warn!(pipeline_id = %job.pipeline_id, %handle, error = %e, "interest poll failed, retrying next run");
                return;
            }
        };

        match status.phase {
            BatchPhase::Running => {
                if self.timed_out(job.created_at, now) {
                    self.abandon_batch(job, &handle, JobStatus::InterestFallbackRunning, now)
                        .await;
                } else if job.status != JobStatus::InterestRunning {
                    job.status = JobStatus::InterestRunning;
                    job.touch(now);
                } else {
                    debug!(pipeline_id = %job.pipeline_id, state = %status.state, "interest batch still running");
                }
            }
            BatchPhase::Ended => {
                warn!(pipeline_id = %job.pipeline_id, state = %status.state, "interest batch did not succeed");
                job.last_error = Some(format!(
                    "interest batch {handle} ended in state {}",
                    status.state
                ));
                job.finalize(JobStatus::Failed, now);
            }
            BatchPhase::Succeeded => {
                let flags = responses::interest_flags(&status.responses);
                if flags.len() != job.documents.len() {
                    warn!(
                        pipeline_id = %job.pipeline_id,
                        responses = flags.len(),
                        documents = job.documents.len(),
                        "interest batch response count does not match document count"
                    );
                }
                self.apply_interest(job, &flags, now).await;
            }
        }
    }

    /// Run the relevance check one document at a time. Any failure abandons
    /// the attempt; the whole set is retried next run.
    async fn interest_fallback(&self, job: &mut PipelineJob, now: DateTime<Utc>) {
        let items: Vec<BatchItem> = job
            .documents
            .iter()
            .map(|d| self.prompts.interest_item(d))
            .collect();

        let mut flags = Vec::with_capacity(items.len());
        for item in &items {
            match self.batch.run_sync(TaskKind::InterestCheck, item).await {
                Ok(text) => flags.push(responses::parse_interest(&text)),
                Err(e) => {
                    warn!(pipeline_id = %job.pipeline_id, key = %item.key, error = %e, "interest fallback failed");
                    job.record_failure(
                        format!("interest fallback failed on {}: {e}", item.key),
                        now,
                    );
                    return;
                }
            }
        }

        self.apply_interest(job, &flags, now).await;
    }

    /// Record the relevance result and start the summary pass. `flags` pair
    /// with documents by position; missing flags mean "not interested".
    async fn apply_interest(&self, job: &mut PipelineJob, flags: &[bool], now: DateTime<Utc>) {
        job.interested_ids = job
            .documents
            .iter()
            .zip(flags)
            .filter(|(_, interested)| **interested)
            .map(|(d, _)| d.id.clone())
            .collect();

        if job.interested_ids.is_empty() {
            info!(pipeline_id = %job.pipeline_id, "no interesting documents");
            job.last_error = None;
            job.finalize(JobStatus::CompletedNoInterests, now);
            return;
        }

        let items: Vec<BatchItem> = job
            .interested_documents()
            .into_iter()
            .map(|d| self.prompts.summary_item(d))
            .collect();
        info!(pipeline_id = %job.pipeline_id, count = items.len(), "submitting summary batch");

        match self.batch.submit(TaskKind::Summarize, &items).await {
            Ok(handle) if !handle.trim().is_empty() => {
                job.summary_job_handle = Some(handle);
                job.status = JobStatus::SummarizeSubmitted;
                job.last_error = None;
            }
            Ok(_) => {
                warn!(pipeline_id = %job.pipeline_id, "summary batch returned no handle, using fallback");
                job.status = JobStatus::SummaryFallbackRunning;
                job.last_error = Some("summary batch submission returned no job handle".into());
            }
            Err(e) => {
                warn!(pipeline_id = %job.pipeline_id, error = %e, "summary batch submission failed, using fallback");
                job.status = JobStatus::SummaryFallbackRunning;
                job.last_error = Some(format!("summary batch submission failed: {e}"));
            }
        }
        job.touch(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        ScriptedBatch, ended, interest_answer, job, pipeline, reload, running, seed, succeeded,
        temp_store,
    };
    use chrono::Duration;

    fn flags(values: &[bool]) -> Vec<Option<String>> {
        values.iter().map(|v| Some(interest_answer(*v))).collect()
    }

    #[tokio::test]
    async fn mixed_flags_submit_interested_subset() {
        let (_dir, store) = temp_store();
        let now = Utc::now();
        let ids = seed(&store, vec![job(&["a", "b", "c"], JobStatus::InterestSubmitted, now)]);
        let batch = ScriptedBatch::new()
            .poll_status("batches/interest", succeeded(flags(&[true, false, true])))
            .submit_ok("batches/summary");

        let report = pipeline(&batch).advance_interest(&store, now).await.unwrap();
        assert_eq!(report.changed, 1);

        let job = reload(&store, &ids[0]);
        assert_eq!(job.interested_ids, vec!["a", "c"]);
        assert_eq!(job.status, JobStatus::SummarizeSubmitted);
        assert_eq!(job.summary_handle(), Some("batches/summary"));
        assert!(job.last_error.is_none());

        let submitted = batch.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].0, TaskKind::Summarize);
        let keys: Vec<_> = submitted[0].1.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn no_interest_completes_without_summary_batch() {
        let (_dir, store) = temp_store();
        let now = Utc::now();
        let ids = seed(&store, vec![job(&["a", "b", "c"], JobStatus::InterestRunning, now)]);
        let batch = ScriptedBatch::new()
            .poll_status("batches/interest", succeeded(flags(&[false, false, false])));

        pipeline(&batch).advance_interest(&store, now).await.unwrap();

        let job = reload(&store, &ids[0]);
        assert_eq!(job.status, JobStatus::CompletedNoInterests);
        assert!(job.interested_ids.is_empty());
        assert_eq!(job.finalized_at, Some(now));
        assert!(batch.submitted().is_empty());
    }

    #[tokio::test]
    async fn short_and_malformed_responses_are_not_interested() {
        let (_dir, store) = temp_store();
        let now = Utc::now();
        let ids = seed(&store, vec![job(&["a", "b", "c"], JobStatus::InterestRunning, now)]);
        let responses = vec![Some("not json".to_string()), Some(interest_answer(true))];
        let batch = ScriptedBatch::new()
            .poll_status("batches/interest", succeeded(responses))
            .submit_ok("batches/summary");

        pipeline(&batch).advance_interest(&store, now).await.unwrap();
        assert_eq!(reload(&store, &ids[0]).interested_ids, vec!["b"]);
    }

    #[tokio::test]
    async fn running_batch_moves_to_running_once() {
        let (_dir, store) = temp_store();
        let t0 = Utc::now();
        let ids = seed(&store, vec![job(&["a"], JobStatus::InterestSubmitted, t0)]);
        let batch = ScriptedBatch::new().poll_status("batches/interest", running());
        let pipeline = pipeline(&batch);

        let report = pipeline.advance_interest(&store, t0 + Duration::hours(1)).await.unwrap();
        assert_eq!(report.changed, 1);
        assert_eq!(reload(&store, &ids[0]).status, JobStatus::InterestRunning);

        let report = pipeline.advance_interest(&store, t0 + Duration::hours(2)).await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.changed, 0);
        assert_eq!(reload(&store, &ids[0]).updated_at, t0 + Duration::hours(1));
    }

    #[tokio::test]
    async fn ended_batch_fails_job() {
        let (_dir, store) = temp_store();
        let now = Utc::now();
        let ids = seed(&store, vec![job(&["a"], JobStatus::InterestRunning, now)]);
        let batch = ScriptedBatch::new()
            .poll_status("batches/interest", ended("BATCH_STATE_EXPIRED"));

        let report = pipeline(&batch).advance_interest(&store, now).await.unwrap();
        assert_eq!(report.finalized, 1);

        let job = reload(&store, &ids[0]);
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.last_error.as_deref().unwrap().contains("BATCH_STATE_EXPIRED"));
        assert_eq!(job.finalized_at, Some(now));
    }

    #[tokio::test]
    async fn unreachable_service_and_missing_handle_skip() {
        let (_dir, store) = temp_store();
        let now = Utc::now();
        let mut no_handle = job(&["a"], JobStatus::InterestSubmitted, now);
        no_handle.interest_job_handle = Some(String::new());
        let ids = seed(
            &store,
            vec![job(&["b"], JobStatus::InterestRunning, now), no_handle],
        );
        let batch = ScriptedBatch::new();
        batch.set_poll("batches/interest", Err("503".into()));

        let report = pipeline(&batch).advance_interest(&store, now).await.unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.changed, 0);
        assert_eq!(batch.polled(), vec!["batches/interest"]);
        assert_eq!(reload(&store, &ids[0]).status, JobStatus::InterestRunning);
    }

    #[tokio::test]
    async fn timeout_cancels_and_switches_to_fallback() {
        let (_dir, store) = temp_store();
        let t0 = Utc::now();
        let mut timed = job(&["a"], JobStatus::InterestRunning, t0);
        timed.retry_count = 7;
        timed.last_error = Some("old".into());
        let ids = seed(&store, vec![timed]);
        let batch = ScriptedBatch::new()
            .poll_status("batches/interest", running())
            .with_cancel(true);

        let later = t0 + Duration::hours(49);
        pipeline(&batch).advance_interest(&store, later).await.unwrap();

        let job = reload(&store, &ids[0]);
        assert_eq!(job.status, JobStatus::InterestFallbackRunning);
        assert_eq!(batch.cancelled(), vec!["batches/interest"]);
        assert!(job.last_error.is_none());
        assert_eq!(job.retry_count, 7);
        assert!(batch.sync_calls().is_empty());
    }

    #[tokio::test]
    async fn timeout_without_cancel_support_records_reason() {
        let (_dir, store) = temp_store();
        let t0 = Utc::now();
        let ids = seed(&store, vec![job(&["a"], JobStatus::InterestRunning, t0)]);
        let batch = ScriptedBatch::new().poll_status("batches/interest", running());

        pipeline(&batch)
            .advance_interest(&store, t0 + Duration::hours(49))
            .await
            .unwrap();

        let job = reload(&store, &ids[0]);
        assert_eq!(job.status, JobStatus::InterestFallbackRunning);
        assert!(batch.cancelled().is_empty());
        assert!(job.last_error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn failed_cancel_still_falls_back() {
        let (_dir, store) = temp_store();
        let t0 = Utc::now();
        let ids = seed(&store, vec![job(&["a"], JobStatus::InterestRunning, t0)]);
        let batch = ScriptedBatch::new()
            .poll_status("batches/interest", running())
            .with_cancel(false);

        pipeline(&batch)
            .advance_interest(&store, t0 + Duration::hours(49))
            .await
            .unwrap();

        let job = reload(&store, &ids[0]);
        assert_eq!(job.status, JobStatus::InterestFallbackRunning);
        assert!(job.last_error.as_deref().unwrap().contains("cancel rejected"));
    }

    #[tokio::test]
    async fn fallback_failure_retries_whole_set() {
        let (_dir, store) = temp_store();
        let now = Utc::now();
        let ids = seed(&store, vec![job(&["a", "b"], JobStatus::InterestFallbackRunning, now)]);
        let batch = ScriptedBatch::new()
            .sync_reply(TaskKind::InterestCheck, "a", Ok(r#"{"interested_in": true}"#))
            .sync_reply(TaskKind::InterestCheck, "b", Err("timeout".into()))
            .submit_ok("batches/summary");
        let pipeline = pipeline(&batch);

        pipeline.advance_interest(&store, now).await.unwrap();
        let job = reload(&store, &ids[0]);
        assert_eq!(job.status, JobStatus::InterestFallbackRunning);
        assert_eq!(job.retry_count, 1);
        assert!(job.interested_ids.is_empty());
        assert!(job.last_error.as_deref().unwrap().contains("timeout"));
        assert!(batch.submitted().is_empty());

        batch.set_sync(TaskKind::InterestCheck, "b", Ok(r#"{"interested_in": false}"#));
        pipeline.advance_interest(&store, now).await.unwrap();

        let job = reload(&store, &ids[0]);
        assert_eq!(job.status, JobStatus::SummarizeSubmitted);
        assert_eq!(job.interested_ids, vec!["a"]);
        assert_eq!(job.retry_count, 1);
        assert!(job.last_error.is_none());
        let calls: Vec<_> = batch.sync_calls().into_iter().map(|(_, key)| key).collect();
        assert_eq!(calls, vec!["a", "b", "a", "b"]);
    }

    #[tokio::test]
    async fn summary_submission_failure_goes_to_fallback() {
        let (_dir, store) = temp_store();
        let now = Utc::now();
        let ids = seed(&store, vec![job(&["a"], JobStatus::InterestRunning, now)]);
        let batch = ScriptedBatch::new()
            .poll_status("batches/interest", succeeded(flags(&[true])))
            .submit_err("quota");

        pipeline(&batch).advance_interest(&store, now).await.unwrap();

        let job = reload(&store, &ids[0]);
        assert_eq!(job.status, JobStatus::SummaryFallbackRunning);
        assert_eq!(job.interested_ids, vec!["a"]);
        assert!(job.summary_handle().is_none());
        assert!(job.last_error.as_deref().unwrap().contains("quota"));
    }

    #[tokio::test]
    async fn other_stages_are_untouched() {
        let (_dir, store) = temp_store();
        let now = Utc::now();
        seed(
            &store,
            vec![
                job(&["a"], JobStatus::SummarizeRunning, now),
                job(&["b"], JobStatus::Completed, now),
                job(&["c"], JobStatus::Unknown("archived".into()), now),
            ],
        );
        let batch = ScriptedBatch::new();

        let report = pipeline(&batch).advance_interest(&store, now).await.unwrap();
        assert_eq!(report, AdvanceReport::default());
        assert_eq!(batch.call_count(), 0);
    }
}
