//! Stages 2 and 3: summaries → notifications.
//!
//! Phase A gathers summaries: jobs in `summarize_submitted` /
//! `summarize_running` poll their summary batch (timeout measured from
//! `updated_at`), jobs in `summary_fallback_running` summarize the missing
//! documents one at a time. `send_failed` jobs skip straight to Phase B.
//!
//! Phase B delivers every summarized, not yet sent document: one
//! announcement per delivery round, then one post per item. Each accepted
//! post is checkpointed to the store before the next one goes out.

use chrono::{DateTime, Utc};
use paperpipe_batch::{BatchItem, BatchPhase, TaskKind};
use paperpipe_notify::{Notifier, OutboundMessage};
use paperpipe_shared::{JobStatus, PipelineJob, Result};
use paperpipe_storage::StateStore;
use tracing::{debug, info, instrument, warn};

use crate::pipeline::{AdvanceReport, Checkpoint, Pipeline, Stage};
use crate::responses;

impl Pipeline<'_> {
    /// Advance every job waiting on summaries or delivery by one step.
    #[instrument(skip_all, fields(now = %now))]
    pub async fn advance_delivery(
        &self,
        notifier: &dyn Notifier,
        store: &StateStore,
        now: DateTime<Utc>,
    ) -> Result<AdvanceReport> {
        self.advance_each(store, Stage::Delivery(notifier), now).await
    }

    pub(crate) async fn step_delivery(
        &self,
        job: &mut PipelineJob,
        notifier: &dyn Notifier,
        checkpoint: &mut Checkpoint<'_>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match job.status {
            JobStatus::SummarizeSubmitted | JobStatus::SummarizeRunning => {
                if !self.poll_summary(job, now).await {
                    return Ok(());
                }
            }
            JobStatus::SummaryFallbackRunning => self.summary_fallback(job, now).await,
            JobStatus::SendFailed => {}
            _ => return Ok(()),
        }

        if job.summaries.is_empty() {
            return Ok(());
        }
        self.deliver(job, notifier, checkpoint, now).await
    }

    // -----------------------------------------------------------------------
    // Phase A
    // -----------------------------------------------------------------------

    /// Poll the summary batch. Returns `false` when the job must not go on
    /// to delivery this round.
    async fn poll_summary(&self, job: &mut PipelineJob, now: DateTime<Utc>) -> bool {
        let Some(handle) = job.summary_handle().map(str::to_owned) else {
            warn!(pipeline_id = %job.pipeline_id, "no summary batch handle, skipping");
            return false;
        };

        let status = match self.batch.poll(&handle).await {
            Ok(status) => status,
            Err(e) => {
                warn!(pipeline_id = %job.pipeline_id, %handle, error = %e, "summary poll failed, retrying next run");
                return false;
            }
        };

        match status.phase {
            BatchPhase::Running => {
                if self.timed_out(job.updated_at, now) {
                    self.abandon_batch(job, &handle, JobStatus::SummaryFallbackRunning, now)
                        .await;
                } else if job.status != JobStatus::SummarizeRunning {
                    job.status = JobStatus::SummarizeRunning;
                    job.touch(now);
                } else {
                    debug!(pipeline_id = %job.pipeline_id, state = %status.state, "summary batch still running");
                }
                true
            }
            BatchPhase::Ended => {
                warn!(pipeline_id = %job.pipeline_id, state = %status.state, "summary batch did not succeed");
                job.last_error = Some(format!(
                    "summary batch {handle} ended in state {}",
                    status.state
                ));
                job.finalize(JobStatus::Failed, now);
                false
            }
            BatchPhase::Succeeded => {
                // Submission order was the interested documents in document order.
                let ids: Vec<String> = job
                    .interested_documents()
                    .into_iter()
                    .map(|d| d.id.clone())
                    .collect();
                let mut parsed = Vec::with_capacity(ids.len());
                for (id, text) in ids.into_iter().zip(&status.responses) {
                    match text.as_deref().and_then(responses::parse_summary) {
                        Some(record) => parsed.push((id, record)),
                        None => {
                            warn!(pipeline_id = %job.pipeline_id, %id, "summary missing from batch output");
                        }
                    }
                }
                let added = job.merge_summaries(parsed);
                job.touch(now);

                let missing = job.documents_missing_summary().len();
                info!(pipeline_id = %job.pipeline_id, added, missing, "summary batch finished");
                if missing > 0 {
                    job.status = JobStatus::SummaryFallbackRunning;
                    job.last_error = Some(format!(
                        "summary batch {handle} returned no usable summary for {missing} documents"
                    ));
                } else {
                    job.last_error = None;
                }
                true
            }
        }
    }

    /// Summarize the still-missing documents one at a time, keeping each
    /// success. The first failure ends the attempt for this round.
    async fn summary_fallback(&self, job: &mut PipelineJob, now: DateTime<Utc>) {
        let items: Vec<BatchItem> = job
            .documents_missing_summary()
            .into_iter()
            .map(|d| self.prompts.summary_item(d))
            .collect();
        if items.is_empty() {
            return;
        }

        for item in &items {
            let reply = self.batch.run_sync(TaskKind::Summarize, item).await;
            let record = match reply {
                Ok(text) => responses::parse_summary(&text)
                    .ok_or_else(|| "answer is not a usable summary".to_string()),
                Err(e) => Err(e.to_string()),
            };
            match record {
                Ok(record) => {
                    job.merge_summaries([(item.key.clone(), record)]);
                    job.touch(now);
                }
                Err(reason) => {
                    warn!(pipeline_id = %job.pipeline_id, key = %item.key, %reason, "summary fallback failed");
                    job.record_failure(
                        format!("summary fallback failed on {}: {reason}", item.key),
                        now,
                    );
                    return;
                }
            }
        }

        info!(pipeline_id = %job.pipeline_id, count = items.len(), "fallback summaries complete");
        job.last_error = None;
    }

    // -----------------------------------------------------------------------
    // Phase B
    // -----------------------------------------------------------------------

    async fn deliver(
        &self,
        job: &mut PipelineJob,
        notifier: &dyn Notifier,
        checkpoint: &mut Checkpoint<'_>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let pending = job.pending_delivery_ids();

        if pending.is_empty() {
            if job.is_fully_delivered() {
                job.last_error = None;
                job.finalize(JobStatus::Completed, now);
            } else if job.status == JobStatus::SendFailed {
                // Everything summarized went out; the rest still needs summaries.
                self.end_round_early(job, now);
            }
            return Ok(());
        }

        let mut posted = false;
        if !job.notification_sent {
            let announcement = OutboundMessage::Announcement {
                count: pending.len(),
            };
            if let Err(e) = notifier.post(&announcement).await {
                warn!(pipeline_id = %job.pipeline_id, error = %e, "announcement failed");
                job.status = JobStatus::SendFailed;
                job.record_failure(format!("announcement failed: {e}"), now);
                return Ok(());
            }
            job.notification_sent = true;
            job.touch(now);
            posted = true;
        }

        let total = pending.len();
        let mut failures = Vec::new();
        for (index, id) in pending.iter().enumerate() {
            let Some(message) = item_message(job, id) else {
                continue;
            };
            if posted && !self.settings.item_delay.is_zero() {
                tokio::time::sleep(self.settings.item_delay).await;
            }
            posted = true;

            match notifier.post(&message).await {
                Ok(()) => {
                    job.mark_sent(id);
                    job.touch(now);
                    checkpoint.save(job)?;
                    debug!(pipeline_id = %job.pipeline_id, %id, "item delivered");
                }
                Err(e) => {
                    warn!(pipeline_id = %job.pipeline_id, %id, error = %e, "item delivery failed");
                    failures.push(format!("{id}: {e}"));
                }
            }
            self.progress.item_posted(index + 1, total);
        }

        if !failures.is_empty() {
            job.status = JobStatus::SendFailed;
            job.record_failure(
                format!(
                    "{} of {total} deliveries failed; first: {}",
                    failures.len(),
                    failures[0]
                ),
                now,
            );
        } else if job.is_fully_delivered() {
            info!(pipeline_id = %job.pipeline_id, sent = job.sent_ids.len(), "all items delivered");
            job.last_error = None;
            job.finalize(JobStatus::Completed, now);
        } else {
            self.end_round_early(job, now);
        }
        Ok(())
    }

    /// Close a delivery round that sent everything summarized while some
    /// interested documents still lack summaries. The next round, once the
    /// fallback fills the gaps, gets its own announcement.
    fn end_round_early(&self, job: &mut PipelineJob, now: DateTime<Utc>) {
        debug!(
            pipeline_id = %job.pipeline_id,
            missing = job.documents_missing_summary().len(),
            "delivery round done, waiting for missing summaries"
        );
        job.status = JobStatus::SummaryFallbackRunning;
        job.notification_sent = false;
        job.touch(now);
    }
}

fn item_message(job: &PipelineJob, id: &str) -> Option<OutboundMessage> {
    let document = job.documents.iter().find(|d| d.id == id)?;
    let summary = job.summaries.get(id)?;
    Some(OutboundMessage::Item {
        document: document.clone(),
        summary: summary.clone(),
    })
}
