//! Schema migrations for the persisted state document.
//!
//! Migrations run in order on load, over the raw JSON, before typed decoding.
//! Each migration names the schema version it produces and only ever renames
//! or fills in fields, so an already-migrated document passes through
//! unchanged.

use serde_json::{Map, Value};

/// A state document migration.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub apply: fn(&mut Map<String, Value>),
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 2,
        description: "Rename paper-specific job fields to document/handle names",
        apply: rename_legacy_job_fields,
    }]
}

/// Job-level renames: legacy name → current name.
const JOB_RENAMES: &[(&str, &str)] = &[
    ("interest_job_name", "interest_job_handle"),
    ("summarize_job_name", "summary_job_handle"),
    ("papers", "documents"),
    ("interested_paper_ids", "interested_ids"),
    ("sent_paper_ids", "sent_ids"),
];

/// Document-level renames inside `documents`.
const DOCUMENT_RENAMES: &[(&str, &str)] = &[
    ("paper_id", "id"),
    ("summary", "body"),
    ("entry_id", "url"),
];

fn rename_legacy_job_fields(root: &mut Map<String, Value>) {
    let Some(Value::Array(jobs)) = root.get_mut("jobs") else {
        return;
    };

    for job in jobs.iter_mut() {
        let Value::Object(job) = job else {
            continue;
        };
        rename_keys(job, JOB_RENAMES);

        if let Some(Value::Array(documents)) = job.get_mut("documents") {
            for document in documents.iter_mut() {
                if let Value::Object(document) = document {
                    rename_keys(document, DOCUMENT_RENAMES);
                }
            }
        }
    }
}

/// Move `old` to `new` unless `new` is already present; a stale `old` is dropped.
fn rename_keys(object: &mut Map<String, Value>, renames: &[(&str, &str)]) {
    for (old, new) in renames {
        if let Some(value) = object.remove(*old) {
            if !object.contains_key(*new) {
                object.insert((*new).to_string(), value);
            }
        }
    }
}
