//! Candidate document discovery.
//!
//! A [`DocumentSource`] produces the ordered list of documents for one
//! discovery run. [`ArxivSource`] searches the arXiv export API for papers
//! submitted on a single day in a set of categories.

mod parser;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use paperpipe_shared::{DiscoveryConfig, Document, PipelineError, Result};
use reqwest::Client;
use tracing::{debug, info, instrument};

pub use parser::FeedPage;

/// Default timeout in seconds for a single API page.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// arXiv asks API clients to wait this long between consecutive calls.
const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(3);

/// User-Agent string for discovery requests.
const USER_AGENT: &str = concat!("paperpipe/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// DocumentSource
// ---------------------------------------------------------------------------

/// Supplies the candidate documents for one discovery run.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Source name for logs (e.g. "arxiv").
    fn name(&self) -> &str;

    /// Fetch the ordered candidate list. An empty list is a valid answer.
    async fn fetch_candidates(&self) -> Result<Vec<Document>>;
}

// ---------------------------------------------------------------------------
// ArxivOptions
// ---------------------------------------------------------------------------

/// Configuration for the arXiv source.
#[derive(Debug, Clone)]
pub struct ArxivOptions {
    /// Query endpoint.
    pub base_url: String,
    /// Categories OR-ed into the query.
    pub categories: Vec<String>,
    /// How many days back the searched submission day lies.
    pub lookback_days: u32,
    /// UTC offset used to decide the calendar day.
    pub utc_offset_hours: i32,
    /// Results per API page.
    pub page_size: usize,
    /// Optional cap on total documents.
    pub max_results: Option<usize>,
    /// Timeout for HTTP requests in seconds.
    pub timeout_secs: u64,
    /// Pause between consecutive page requests.
    pub page_delay: Duration,
}

impl Default for ArxivOptions {
    fn default() -> Self {
        Self::from(&DiscoveryConfig::default())
    }
}

impl From<&DiscoveryConfig> for ArxivOptions {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            categories: config.categories.clone(),
            lookback_days: config.lookback_days,
            utc_offset_hours: config.utc_offset_hours,
            page_size: config.page_size.max(1),
            max_results: config.max_results,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            page_delay: DEFAULT_PAGE_DELAY,
        }
    }
}

// ---------------------------------------------------------------------------
// ArxivSource
// ---------------------------------------------------------------------------

/// Searches arXiv for papers submitted on one day.
pub struct ArxivSource {
    options: ArxivOptions,
    client: Client,
}

impl ArxivSource {
    pub fn new(options: ArxivOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { options, client })
    }

    /// Fetch every paper submitted on the day `lookback_days` before `now`.
    #[instrument(skip_all, fields(now = %now))]
    pub async fn fetch_for(&self, now: DateTime<Utc>) -> Result<Vec<Document>> {
        let query = build_query(&self.options, now)?;
        info!(%query, "searching arXiv");

        let cap = self.options.max_results.unwrap_or(usize::MAX);
        let mut seen = HashSet::new();
        let mut documents = Vec::new();
        let mut start = 0;

        loop {
            if start > 0 && !self.options.page_delay.is_zero() {
                tokio::time::sleep(self.options.page_delay).await;
            }

            let page_size = self.options.page_size.min(cap - documents.len());
            let page = self.fetch_page(&query, start, page_size).await?;
            debug!(
                start,
                entries = page.entry_count,
                total = ?page.total_results,
                "fetched result page"
            );

            for document in page.documents {
                if documents.len() >= cap {
                    break;
                }
                if seen.insert(document.id.clone()) {
                    documents.push(document);
                }
            }

            start += page.entry_count;
            let exhausted = page.entry_count == 0
                || page.total_results.is_some_and(|total| start >= total)
                || documents.len() >= cap;
            if exhausted {
                break;
            }
        }

        info!(count = documents.len(), "arXiv search complete");
        Ok(documents)
    }

    async fn fetch_page(&self, query: &str, start: usize, page_size: usize) -> Result<FeedPage> {
        let url = &self.options.base_url;
        let response = self
            .client
            .get(url)
            .query(&[
                ("search_query", query.to_string()),
                ("start", start.to_string()),
                ("max_results", page_size.to_string()),
                ("sortBy", "submittedDate".to_string()),
                ("sortOrder", "descending".to_string()),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Network(format!("{url}: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::Network(format!("{url}: failed to read body: {e}")))?;

        parser::parse_feed(&body)
    }
}

#[async_trait]
impl DocumentSource for ArxivSource {
    fn name(&self) -> &str {
        "arxiv"
    }

    async fn fetch_candidates(&self) -> Result<Vec<Document>> {
        self.fetch_for(Utc::now()).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build `(cat:A OR cat:B) AND submittedDate:[YYYYMMDD0000 TO YYYYMMDD2359]`.
fn build_query(options: &ArxivOptions, now: DateTime<Utc>) -> Result<String> {
    if options.categories.is_empty() {
        return Err(PipelineError::config("discovery needs at least one category"));
    }

    let offset = FixedOffset::east_opt(options.utc_offset_hours * 3600).ok_or_else(|| {
        PipelineError::config(format!(
            "utc_offset_hours out of range: {}",
            options.utc_offset_hours
        ))
    })?;
    let day = now.with_timezone(&offset) - chrono::Duration::days(i64::from(options.lookback_days));
    let day = day.format("%Y%m%d");

    let categories = options
        .categories
        .iter()
        .map(|c| format!("cat:{c}"))
        .collect::<Vec<_>>()
        .join(" OR ");

    Ok(format!(
        "({categories}) AND submittedDate:[{day}0000 TO {day}2359]"
    ))
}
