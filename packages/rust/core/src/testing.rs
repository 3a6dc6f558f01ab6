//! Fake adapters for orchestrator tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paperpipe_batch::{BatchClient, BatchItem, BatchPhase, BatchStatus, TaskKind};
use paperpipe_discovery::DocumentSource;
use paperpipe_notify::{Notifier, OutboundMessage};
use paperpipe_shared::{
    Document, JobStatus, PipelineError, PipelineJob, PipelineSettings, Result, SummaryRecord,
};
use paperpipe_storage::StateStore;

use crate::pipeline::Pipeline;
use crate::prompts::PromptSet;

type Scripted<T> = std::result::Result<T, String>;

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Batch client answering from a script and recording every call.
#[derive(Default)]
pub(crate) struct ScriptedBatch {
    submits: Mutex<VecDeque<Scripted<String>>>,
    polls: Mutex<HashMap<String, Scripted<BatchStatus>>>,
    sync: Mutex<HashMap<(TaskKind, String), Scripted<String>>>,
    /// `None`: cancellation unsupported. `Some(ok)`: cancel succeeds iff `ok`.
    cancel: Option<bool>,

    submitted: Mutex<Vec<(TaskKind, Vec<BatchItem>)>>,
    polled: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
    sync_calls: Mutex<Vec<(TaskKind, String)>>,
}

impl ScriptedBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit_ok(self, handle: &str) -> Self {
        self.submits.lock().unwrap().push_back(Ok(handle.into()));
        self
    }

    pub fn submit_err(self, reason: &str) -> Self {
        self.submits.lock().unwrap().push_back(Err(reason.into()));
        self
    }

    pub fn poll_status(self, handle: &str, status: BatchStatus) -> Self {
        self.set_poll(handle, Ok(status));
        self
    }

    pub fn sync_reply(self, kind: TaskKind, key: &str, reply: Scripted<&str>) -> Self {
        self.set_sync(kind, key, reply);
        self
    }

    pub fn with_cancel(mut self, succeeds: bool) -> Self {
        self.cancel = Some(succeeds);
        self
    }

    pub fn set_poll(&self, handle: &str, status: Scripted<BatchStatus>) {
        self.polls.lock().unwrap().insert(handle.into(), status);
    }

    pub fn set_sync(&self, kind: TaskKind, key: &str, reply: Scripted<&str>) {
        self.sync
            .lock()
            .unwrap()
            .insert((kind, key.into()), reply.map(String::from));
    }

    pub fn submitted(&self) -> Vec<(TaskKind, Vec<BatchItem>)> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn polled(&self) -> Vec<String> {
        self.polled.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn sync_calls(&self) -> Vec<(TaskKind, String)> {
        self.sync_calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.submitted().len()
            + self.polled().len()
            + self.cancelled().len()
            + self.sync_calls().len()
    }
}

#[async_trait]
impl BatchClient for ScriptedBatch {
    async fn submit(&self, kind: TaskKind, items: &[BatchItem]) -> Result<String> {
        self.submitted.lock().unwrap().push((kind, items.to_vec()));
        self.submits
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("no scripted submission".into()))
            .map_err(PipelineError::Batch)
    }

    async fn poll(&self, handle: &str) -> Result<BatchStatus> {
        self.polled.lock().unwrap().push(handle.into());
        self.polls
            .lock()
            .unwrap()
            .get(handle)
            .cloned()
            .unwrap_or_else(|| Err(format!("unknown handle {handle}")))
            .map_err(PipelineError::Batch)
    }

    fn supports_cancel(&self) -> bool {
        self.cancel.is_some()
    }

    async fn cancel(&self, handle: &str) -> Result<()> {
        self.cancelled.lock().unwrap().push(handle.into());
        match self.cancel {
            Some(true) => Ok(()),
            _ => Err(PipelineError::Batch("cancel rejected".into())),
        }
    }

    async fn run_sync(&self, kind: TaskKind, item: &BatchItem) -> Result<String> {
        self.sync_calls.lock().unwrap().push((kind, item.key.clone()));
        self.sync
            .lock()
            .unwrap()
            .get(&(kind, item.key.clone()))
            .cloned()
            .unwrap_or_else(|| Err(format!("no scripted reply for {}", item.key)))
            .map_err(PipelineError::Batch)
    }
}

pub(crate) fn running() -> BatchStatus {
    BatchStatus::running("BATCH_STATE_RUNNING")
}

pub(crate) fn ended(state: &str) -> BatchStatus {
    BatchStatus {
        state: state.into(),
        phase: BatchPhase::Ended,
        responses: vec![],
    }
}

pub(crate) fn succeeded(responses: Vec<Option<String>>) -> BatchStatus {
    BatchStatus {
        state: "BATCH_STATE_SUCCEEDED".into(),
        phase: BatchPhase::Succeeded,
        responses,
    }
}

pub(crate) fn interest_answer(interested: bool) -> String {
    format!(r#"{{"interested_in": {interested}}}"#)
}

pub(crate) fn summary_answer(title: &str) -> String {
    format!(r#"{{"title": "{title}", "summary": "About {title}.", "keywords": ["k"]}}"#)
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Notifier that records accepted messages and fails on demand.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    accepted: Mutex<Vec<OutboundMessage>>,
    attempts: Mutex<usize>,
    fail_announcements: Mutex<bool>,
    failing_items: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_announcements(&self, fail: bool) {
        *self.fail_announcements.lock().unwrap() = fail;
    }

    pub fn fail_item(&self, id: &str) {
        self.failing_items.lock().unwrap().insert(id.into());
    }

    pub fn heal(&self) {
        self.fail_announcements(false);
        self.failing_items.lock().unwrap().clear();
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    /// Counts carried by accepted announcements, in order.
    pub fn announcements(&self) -> Vec<usize> {
        self.accepted
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::Announcement { count } => Some(*count),
                OutboundMessage::Item { .. } => None,
            })
            .collect()
    }

    /// Ids of accepted item posts, in order.
    pub fn delivered(&self) -> Vec<String> {
        self.accepted
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::Item { document, .. } => Some(document.id.clone()),
                OutboundMessage::Announcement { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn post(&self, message: &OutboundMessage) -> Result<()> {
        *self.attempts.lock().unwrap() += 1;
        let rejected = match message {
            OutboundMessage::Announcement { .. } => *self.fail_announcements.lock().unwrap(),
            OutboundMessage::Item { document, .. } => {
                self.failing_items.lock().unwrap().contains(&document.id)
            }
        };
        if rejected {
            return Err(PipelineError::Notify("webhook answered HTTP 500".into()));
        }
        self.accepted.lock().unwrap().push(message.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

pub(crate) struct FixedSource(pub Vec<Document>);

#[async_trait]
impl DocumentSource for FixedSource {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn fetch_candidates(&self) -> Result<Vec<Document>> {
        Ok(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub(crate) fn doc(id: &str) -> Document {
    Document {
        id: id.into(),
        title: format!("Title {id}"),
        body: format!("Abstract {id}"),
        authors: vec!["A. Author".into()],
        published: None,
        url: Some(format!("http://arxiv.org/abs/{id}")),
    }
}

pub(crate) fn summary(id: &str) -> SummaryRecord {
    SummaryRecord {
        title: id.into(),
        summary: format!("About {id}."),
        keywords: vec!["k".into()],
        appendix: None,
    }
}

pub(crate) fn temp_store() -> (tempfile::TempDir, StateStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = StateStore::new(dir.path().join("pending_jobs.json"));
    (dir, store)
}

pub(crate) fn settings() -> PipelineSettings {
    PipelineSettings {
        batch_timeout: chrono::Duration::hours(48),
        item_delay: Duration::ZERO,
    }
}

pub(crate) fn pipeline(batch: &ScriptedBatch) -> Pipeline<'_> {
    Pipeline::new(batch, PromptSet::default(), settings())
}

/// A job over `ids` in `status`, created at `now`.
pub(crate) fn job(ids: &[&str], status: JobStatus, now: DateTime<Utc>) -> PipelineJob {
    let mut job = PipelineJob::new(
        ids.iter().copied().map(doc).collect(),
        "batches/interest".into(),
        now,
    );
    job.status = status;
    job
}

/// Save `jobs` as the whole state and return their ids.
pub(crate) fn seed(store: &StateStore, jobs: Vec<PipelineJob>) -> Vec<String> {
    let mut state = store.load().unwrap();
    let ids = jobs.iter().map(|j| j.pipeline_id.to_string()).collect();
    for job in jobs {
        state.push_job(job);
    }
    store.save(&state).unwrap();
    ids
}

/// Reload the job with `id` from the store.
pub(crate) fn reload(store: &StateStore, id: &str) -> PipelineJob {
    store
        .load()
        .unwrap()
        .find_job(id)
        .cloned()
        .expect("job present")
}
