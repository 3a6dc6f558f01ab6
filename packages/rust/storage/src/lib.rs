//! File-backed state store.
//!
//! The [`StateStore`] holds every pipeline job in a single JSON document that
//! is loaded wholesale and saved wholesale by each invocation.
//!
//! **Access rules:**
//! - One active runner per entry point; runs of different entry points may
//!   interleave since they advance disjoint status sets.
//! - Loading never fails on content: unreadable documents are set aside and
//!   replaced by an empty one, unknown fields are preserved.

mod migrations;

use std::path::{Path, PathBuf};

use chrono::Utc;
use paperpipe_shared::{CURRENT_SCHEMA_VERSION, PipelineError, Result, StateDocument};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Handle to the JSON state file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state document, creating an empty one on first use.
    pub fn load(&self) -> Result<StateDocument> {
        if !self.path.exists() {
            info!(path = ?self.path, "state file not found, creating empty state");
            let state = StateDocument::default();
            self.save(&state)?;
            return Ok(state);
        }

        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| PipelineError::io(&self.path, e))?;

        match decode_state(&raw) {
            Ok(state) => {
                debug!(path = ?self.path, jobs = state.jobs.len(), "state loaded");
                Ok(state)
            }
            Err(reason) => {
                let backup = self.set_aside()?;
                warn!(
                    path = ?self.path,
                    backup = ?backup,
                    reason = %reason,
                    "state file unreadable, starting from empty state"
                );
                Ok(StateDocument::default())
            }
        }
    }

    /// Overwrite the state file with `state`.
    ///
    /// Writes to a sibling temp file first and renames it into place so a
    /// crash mid-write leaves the previous document intact.
    pub fn save(&self, state: &StateDocument) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| PipelineError::Storage(format!("failed to serialize state: {e}")))?;

        let tmp = self.temp_path();
        std::fs::write(&tmp, json).map_err(|e| PipelineError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| PipelineError::io(&self.path, e))?;

        debug!(path = ?self.path, jobs = state.jobs.len(), "state saved");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Move an unreadable state file out of the way so the empty replacement
    /// does not destroy it.
    fn set_aside(&self) -> Result<PathBuf> {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%SZ")));
        let backup = self.path.with_file_name(name);
        std::fs::rename(&self.path, &backup).map_err(|e| PipelineError::io(&self.path, e))?;
        Ok(backup)
    }
}

/// Decode a raw state document: parse, migrate to the current schema, then
/// decode into typed jobs.
///
/// Returns `Err` only when the top-level shape is unusable (not JSON, or not
/// an object). Missing or malformed `schema_version`/`jobs` are defaulted.
pub fn decode_state(raw: &str) -> std::result::Result<StateDocument, String> {
    let value: Value = serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))?;
    let Value::Object(mut root) = value else {
        return Err("top-level value is not an object".into());
    };

    if !matches!(root.get("jobs"), Some(Value::Array(_))) {
        if root.contains_key("jobs") {
            warn!("state `jobs` is not an array, resetting it");
        }
        root.insert("jobs".into(), Value::Array(Vec::new()));
    }

    let version = schema_version(&root);
    upgrade(&mut root, version);

    serde_json::from_value(Value::Object(root)).map_err(|e| format!("undecodable state: {e}"))
}

/// Schema version of a raw document. Documents written before versioning
/// (or with a garbled version) are treated as version 1.
fn schema_version(root: &Map<String, Value>) -> u32 {
    root.get("schema_version")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(1)
}

/// Apply every migration newer than `from`, then stamp the version.
fn upgrade(root: &mut Map<String, Value>, from: u32) {
    if from > CURRENT_SCHEMA_VERSION {
        warn!(
            found = from,
            supported = CURRENT_SCHEMA_VERSION,
            "state written by a newer schema, loading best-effort"
        );
        return;
    }

    for migration in migrations::all_migrations() {
        if migration.version > from {
            info!(
                version = migration.version,
                description = migration.description,
                "applying state migration"
            );
            (migration.apply)(root);
        }
    }
    root.insert("schema_version".into(), Value::from(CURRENT_SCHEMA_VERSION));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use paperpipe_shared::{Document, JobStatus, PipelineJob};

    fn temp_store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state").join("pending_jobs.json"));
        (dir, store)
    }

    fn doc(id: &str) -> Document {
        Document {
            id: id.into(),
            title: "T".into(),
            body: "B".into(),
            authors: vec![],
            published: None,
            url: None,
        }
    }

    #[test]
    fn load_creates_empty_state() {
        let (_dir, store) = temp_store();
        let state = store.load().expect("load");
        assert_eq!(state.schema_version, CURRENT_SCHEMA_VERSION);
        assert!(state.jobs.is_empty());
        assert!(store.path().exists());
    }

    #[test]
    fn save_then_load_keeps_jobs() {
        let (_dir, store) = temp_store();
        let mut state = store.load().unwrap();
        let job = PipelineJob::new(vec![doc("a"), doc("b")], "batches/1".into(), Utc::now());
        let id = job.pipeline_id.clone();
        state.push_job(job);
        store.save(&state).expect("save");

        let loaded = store.load().unwrap();
        let job = loaded.find_job(id.as_str()).expect("job present");
        assert_eq!(job.status, JobStatus::InterestSubmitted);
        assert_eq!(job.documents.len(), 2);
        assert_eq!(job.interest_handle(), Some("batches/1"));
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn unparseable_file_is_set_aside() {
        let (dir, store) = temp_store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{ not json").unwrap();

        let state = store.load().expect("load coerces");
        assert!(state.jobs.is_empty());

        let backups: Vec<_> = std::fs::read_dir(dir.path().join("state"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn non_object_document_is_coerced() {
        assert!(decode_state("[1, 2, 3]").is_err());

        let state = decode_state(r#"{"jobs": {"oops": true}}"#).expect("decode");
        assert!(state.jobs.is_empty());
        assert_eq!(state.schema_version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn legacy_document_is_upgraded() {
        let raw = r#"{
            "schema_version": 1,
            "jobs": [{
                "pipeline_id": "20250101T000000Z-deadbeef",
                "status": "send_failed",
                "interest_job_name": "batches/i",
                "summarize_job_name": "batches/s",
                "papers": [
                    {"paper_id": "x1", "entry_id": "x1", "title": "One", "summary": "abs", "authors": ["A"], "published": "2025-01-01T00:00:00+00:00"},
                    {"paper_id": "x2", "entry_id": "x2", "title": "Two", "summary": "abs", "authors": [], "published": null}
                ],
                "interested_paper_ids": ["x1", "x2"],
                "summaries": {"x1": {"title": "One", "summary": "s", "keywords": ["k"], "appendix": null}},
                "sent_paper_ids": ["x1"],
                "notification_sent": true,
                "retry_count": 2,
                "last_error": null,
                "created_at": "2025-01-01T00:00:00+00:00",
                "updated_at": "2025-01-02T00:00:00+00:00",
                "finalized_at": null
            }]
        }"#;

        let state = decode_state(raw).expect("decode");
        assert_eq!(state.schema_version, CURRENT_SCHEMA_VERSION);
        let job = state.jobs().next().expect("typed job");
        assert_eq!(job.status, JobStatus::SendFailed);
        assert_eq!(job.summary_handle(), Some("batches/s"));
        assert_eq!(job.documents[0].id, "x1");
        assert_eq!(job.documents[0].body, "abs");
        assert_eq!(job.documents[0].url.as_deref(), Some("x1"));
        assert_eq!(job.sent_ids, vec!["x1"]);
        assert_eq!(job.pending_delivery_ids(), Vec::<String>::new());
        assert_eq!(job.retry_count, 2);
        assert!(job.invariant_violations().is_empty());
    }

    #[test]
    fn unversioned_document_defaults() {
        let state = decode_state(r#"{"jobs": []}"#).expect("decode");
        assert_eq!(state.schema_version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn newer_schema_is_loaded_as_is() {
        let state = decode_state(r#"{"schema_version": 99, "jobs": [], "future": 1}"#).unwrap();
        assert_eq!(state.schema_version, 99);
        assert_eq!(state.extra["future"], 1);
    }
}
