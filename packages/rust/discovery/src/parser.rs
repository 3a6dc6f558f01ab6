//! arXiv Atom feed parser.
//!
//! The export API answers with an Atom feed:
//! - `<opensearch:totalResults>`: total hits for the query
//! - one `<entry>` per paper with `<id>`, `<title>`, `<summary>`,
//!   `<published>` and repeated `<author><name>`
//!
//! Only those elements are read, with plain regex extraction; the feed shape
//! is stable and flat enough that a full XML parser buys nothing.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use paperpipe_shared::{Document, PipelineError, Result};
use regex::Regex;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One page of search results.
#[derive(Debug, Clone)]
pub struct FeedPage {
    /// Total hits reported by the API, if present.
    pub total_results: Option<usize>,
    /// Number of `<entry>` elements on this page, including skipped ones.
    pub entry_count: usize,
    /// Entries that mapped to documents.
    pub documents: Vec<Document>,
}

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

static ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<entry\b[^>]*>(.*?)</entry>").expect("entry regex"));

static ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<id\b[^>]*>(.*?)</id>").expect("id regex"));

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<title\b[^>]*>(.*?)</title>").expect("title regex"));

static SUMMARY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<summary\b[^>]*>(.*?)</summary>").expect("summary regex"));

static PUBLISHED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<published\b[^>]*>(.*?)</published>").expect("published regex")
});

static AUTHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<author\b[^>]*>.*?<name\b[^>]*>(.*?)</name>.*?</author>")
        .expect("author regex")
});

static TOTAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<opensearch:totalResults\b[^>]*>\s*(\d+)\s*</opensearch:totalResults>")
        .expect("total regex")
});

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse one Atom page from the export API.
pub(crate) fn parse_feed(content: &str) -> Result<FeedPage> {
    if !content.contains("<feed") {
        return Err(PipelineError::parse("response is not an Atom feed"));
    }

    let total_results = TOTAL_RE
        .captures(content)
        .and_then(|caps| caps[1].parse().ok());

    let mut entry_count = 0;
    let mut documents = Vec::new();
    for caps in ENTRY_RE.captures_iter(content) {
        entry_count += 1;
        if let Some(document) = parse_entry(&caps[1]) {
            documents.push(document);
        }
    }

    Ok(FeedPage {
        total_results,
        entry_count,
        documents,
    })
}

/// Map a single `<entry>` body to a document. Error entries (the API reports
/// query problems as a fake entry) and entries without an id are skipped.
fn parse_entry(entry: &str) -> Option<Document> {
    let id = text_of(&ID_RE, entry)?;
    if id.is_empty() || id.contains("/api/errors") {
        tracing::warn!(%id, "skipping error entry in feed");
        return None;
    }

    let title = text_of(&TITLE_RE, entry).unwrap_or_default();
    let body = text_of(&SUMMARY_RE, entry).unwrap_or_default();
    let published = text_of(&PUBLISHED_RE, entry)
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc));
    let authors = AUTHOR_RE
        .captures_iter(entry)
        .map(|caps| clean_text(&caps[1]))
        .filter(|name| !name.is_empty())
        .collect();

    Some(Document {
        url: Some(id.clone()),
        id,
        title,
        body,
        authors,
        published,
    })
}

fn text_of(re: &Regex, haystack: &str) -> Option<String> {
    re.captures(haystack).map(|caps| clean_text(&caps[1]))
}

/// Decode the XML entities arXiv emits and collapse runs of whitespace.
fn clean_text(raw: &str) -> String {
    let decoded = raw
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    WHITESPACE_RE.replace_all(decoded.trim(), " ").into_owned()
}
