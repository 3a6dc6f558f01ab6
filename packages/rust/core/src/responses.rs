//! Decoding of model answers.
//!
//! Answers are JSON constrained by a response schema, but models still
//! occasionally wrap them in a Markdown code fence or return junk. Malformed
//! relevance answers count as "not interested"; malformed summaries are
//! dropped so the document is retried by the fallback.

use std::sync::LazyLock;

use paperpipe_shared::SummaryRecord;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z]*\s*(.*?)\s*```\s*$").expect("fence regex")
});

#[derive(Debug, Deserialize)]
struct InterestAnswer {
    interested_in: bool,
}

/// Strip an optional Markdown code fence around a JSON answer.
fn unfence(text: &str) -> &str {
    match FENCE_RE.captures(text).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str(),
        None => text.trim(),
    }
}

/// Whether a relevance answer says "interested". Anything unreadable is `false`.
pub fn parse_interest(text: &str) -> bool {
    match serde_json::from_str::<InterestAnswer>(unfence(text)) {
        Ok(answer) => answer.interested_in,
        Err(e) => {
            debug!(error = %e, "malformed interest answer, treating as not interested");
            false
        }
    }
}

/// One flag per batch response, by position. Missing responses are `false`.
pub fn interest_flags(responses: &[Option<String>]) -> Vec<bool> {
    responses
        .iter()
        .map(|r| r.as_deref().is_some_and(parse_interest))
        .collect()
}

/// Decode a summary answer. Returns `None` when it is unreadable or empty.
pub fn parse_summary(text: &str) -> Option<SummaryRecord> {
    match serde_json::from_str::<SummaryRecord>(unfence(text)) {
        Ok(record) if !record.summary.trim().is_empty() => Some(record),
        Ok(_) => {
            debug!("summary answer has an empty summary");
            None
        }
        Err(e) => {
            debug!(error = %e, "malformed summary answer");
            None
        }
    }
}
