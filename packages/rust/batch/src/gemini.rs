//! Gemini API batch client.
//!
//! Endpoints used (relative to `base_url`):
//! - `POST models/{model}:batchGenerateContent`: submit inline requests
//! - `GET {name}`: poll a batch (`batches/...`) or its operation
//! - `POST {name}:cancel`: cancel a batch
//! - `POST models/{model}:generateContent`: synchronous single request
//!
//! Every request asks for JSON output constrained by a response schema, so
//! the returned text is the raw JSON answer for the caller to decode.

use std::time::Duration;

use async_trait::async_trait;
use paperpipe_shared::{BatchConfig, PipelineError, Result};
use reqwest::{Client, Response};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::{BatchClient, BatchItem, BatchStatus, TaskKind, classify_state};

/// Header carrying the API key.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Paths where a batch's inline responses may appear, depending on whether
/// the poll returned the batch resource or its long-running operation.
const RESPONSE_POINTERS: &[&str] = &[
    "/response/inlinedResponses/inlinedResponses",
    "/metadata/output/inlinedResponses/inlinedResponses",
    "/output/inlinedResponses/inlinedResponses",
    "/dest/inlinedResponses",
    "/response/inlinedResponses",
];

/// Paths where the batch state may appear.
const STATE_POINTERS: &[&str] = &["/metadata/state", "/state", "/response/state"];

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Connection settings for [`GeminiBatchClient`].
#[derive(Debug, Clone)]
pub struct GeminiOptions {
    pub base_url: String,
    pub api_key: String,
    pub interest_model: String,
    pub summary_model: String,
    pub request_timeout: Duration,
    /// Whether to issue cancel calls on timed-out batches.
    pub cancel_enabled: bool,
}

impl GeminiOptions {
    pub fn from_config(config: &BatchConfig, api_key: String) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            interest_model: config.interest_model.clone(),
            summary_model: config.summary_model.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            cancel_enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// [`BatchClient`] backed by the Gemini API.
pub struct GeminiBatchClient {
    options: GeminiOptions,
    client: Client,
}

impl GeminiBatchClient {
    pub fn new(options: GeminiOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| PipelineError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { options, client })
    }

    fn model_for(&self, kind: TaskKind) -> &str {
        match kind {
            TaskKind::InterestCheck => &self.options.interest_model,
            TaskKind::Summarize => &self.options.summary_model,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.options.base_url, path.trim_start_matches('/'))
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.options.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| PipelineError::Network(format!("{url}: {e}")))?;
        read_json(url, response).await
    }
}

#[async_trait]
impl BatchClient for GeminiBatchClient {
    #[instrument(skip_all, fields(kind = %kind, items = items.len()))]
    async fn submit(&self, kind: TaskKind, items: &[BatchItem]) -> Result<String> {
        let model = self.model_for(kind);
        let url = self.url(&format!("models/{model}:batchGenerateContent"));

        let requests: Vec<Value> = items
            .iter()
            .map(|item| {
                json!({
                    "request": request_body(kind, &item.prompt),
                    "metadata": { "key": item.key },
                })
            })
            .collect();
        let body = json!({
            "batch": {
                "displayName": format!("paperpipe-{kind}"),
                "inputConfig": { "requests": { "requests": requests } },
            }
        });

        let reply = self.post_json(&url, &body).await?;
        let name = reply
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| PipelineError::Batch(format!("{url}: reply carries no batch name")))?;

        info!(%model, handle = name, "batch submitted");
        Ok(name.to_string())
    }

    #[instrument(skip_all, fields(handle = %handle))]
    async fn poll(&self, handle: &str) -> Result<BatchStatus> {
        let url = self.url(handle);
        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.options.api_key)
            .send()
            .await
            .map_err(|e| PipelineError::Network(format!("{url}: {e}")))?;
        let reply = read_json(&url, response).await?;

        let state = STATE_POINTERS
            .iter()
            .find_map(|p| reply.pointer(p).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();
        let phase = classify_state(&state);
        let responses = RESPONSE_POINTERS
            .iter()
            .find_map(|p| reply.pointer(p).and_then(Value::as_array))
            .map(|entries| entries.iter().map(inlined_response_text).collect())
            .unwrap_or_default();

        debug!(%state, ?phase, "batch polled");
        Ok(BatchStatus {
            state,
            phase,
            responses,
        })
    }

    fn supports_cancel(&self) -> bool {
        self.options.cancel_enabled
    }

    async fn cancel(&self, handle: &str) -> Result<()> {
        let url = self.url(&format!("{handle}:cancel"));
        self.post_json(&url, &json!({})).await?;
        info!(handle, "batch cancelled");
        Ok(())
    }

    #[instrument(skip_all, fields(kind = %kind, key = %item.key))]
    async fn run_sync(&self, kind: TaskKind, item: &BatchItem) -> Result<String> {
        let model = self.model_for(kind);
        let url = self.url(&format!("models/{model}:generateContent"));
        let reply = self.post_json(&url, &request_body(kind, &item.prompt)).await?;
        response_text(&reply)
            .ok_or_else(|| PipelineError::Batch(format!("{url}: reply carries no text")))
    }
}

// ---------------------------------------------------------------------------
// Request / response shapes
// ---------------------------------------------------------------------------

/// `GenerateContentRequest` body for one prompt.
fn request_body(kind: TaskKind, prompt: &str) -> Value {
    let mut generation_config = json!({
        "responseMimeType": "application/json",
        "responseSchema": response_schema(kind),
    });
    if kind == TaskKind::Summarize {
        generation_config["thinkingConfig"] = json!({ "thinkingLevel": "low" });
    }
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": generation_config,
    })
}

fn response_schema(kind: TaskKind) -> Value {
    match kind {
        TaskKind::InterestCheck => json!({
            "type": "OBJECT",
            "properties": { "interested_in": { "type": "BOOLEAN" } },
            "required": ["interested_in"],
        }),
        TaskKind::Summarize => json!({
            "type": "OBJECT",
            "properties": {
                "title": { "type": "STRING" },
                "summary": { "type": "STRING" },
                "keywords": { "type": "ARRAY", "items": { "type": "STRING" } },
                "appendix": { "type": "STRING", "nullable": true },
            },
            "required": ["title", "summary", "keywords"],
        }),
    }
}

/// Text of one inlined batch response; `None` for per-item errors.
fn inlined_response_text(entry: &Value) -> Option<String> {
    if let Some(error) = entry.get("error") {
        warn!(%error, "batch item failed");
        return None;
    }
    entry.get("response").and_then(response_text)
}

/// Concatenated text parts of the first candidate.
fn response_text(response: &Value) -> Option<String> {
    let parts = response.pointer("/candidates/0/content/parts")?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}

async fn read_json(url: &str, response: Response) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| PipelineError::Network(format!("{url}: failed to read body: {e}")))?;
    if !status.is_success() {
        return Err(PipelineError::Batch(format!(
            "{url}: HTTP {status}: {}",
            body.chars().take(200).collect::<String>()
        )));
    }
    serde_json::from_str(&body)
        .map_err(|e| PipelineError::parse(format!("{url}: invalid JSON reply: {e}")))
}
