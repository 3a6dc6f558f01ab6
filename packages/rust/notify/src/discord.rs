//! Discord webhook notifier.
//!
//! Announcements are plain `content` messages; items are a single embed with
//! authors, summary, optional appendix, and keywords as fields. Discord
//! answers a successful webhook post with `204 No Content`; any other status
//! counts as a failure.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use paperpipe_shared::{Document, PipelineError, Result, SummaryRecord};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::{Notifier, OutboundMessage};

/// Discord rejects embed titles longer than this.
const MAX_TITLE_CHARS: usize = 256;

/// Discord rejects embed field values longer than this.
const MAX_FIELD_CHARS: usize = 1024;

const EMBED_COLOR: u32 = 0xE1_2D2D;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct WebhookPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
struct Embed {
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    color: u32,
    timestamp: String,
    author: EmbedAuthor,
    fields: Vec<EmbedField>,
    footer: EmbedFooter,
}

#[derive(Debug, Serialize)]
struct EmbedAuthor {
    name: &'static str,
    url: &'static str,
}

#[derive(Debug, Serialize)]
struct EmbedField {
    name: &'static str,
    value: String,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct EmbedFooter {
    text: &'static str,
}

// ---------------------------------------------------------------------------
// DiscordWebhook
// ---------------------------------------------------------------------------

/// Posts to a Discord incoming webhook.
pub struct DiscordWebhook {
    url: String,
    client: Client,
}

impl DiscordWebhook {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Notifier for DiscordWebhook {
    #[instrument(skip_all, fields(kind = message.kind()))]
    async fn post(&self, message: &OutboundMessage) -> Result<()> {
        let payload = build_payload(message);
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PipelineError::Notify(format!("webhook request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            debug!("webhook accepted message");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(PipelineError::Notify(format!(
            "webhook answered HTTP {status}: {}",
            truncate(&body, 200)
        )))
    }
}

fn build_payload(message: &OutboundMessage) -> WebhookPayload {
    match message {
        OutboundMessage::Announcement { count } => WebhookPayload {
            content: Some(format!("{count} new papers found. Summaries follow.")),
            embeds: Vec::new(),
        },
        OutboundMessage::Item { document, summary } => WebhookPayload {
            content: None,
            embeds: vec![item_embed(document, summary)],
        },
    }
}

fn item_embed(document: &Document, summary: &SummaryRecord) -> Embed {
    let mut fields = vec![
        field("Authors", document.authors.join(", ")),
        field("Summary", summary.summary.clone()),
    ];
    if let Some(appendix) = summary.appendix.as_deref().filter(|a| !a.trim().is_empty()) {
        fields.push(field("Notes", appendix.to_string()));
    }
    fields.push(field("Keywords", summary.keywords.join(", ")));

    let title = if summary.title.trim().is_empty() {
        &document.title
    } else {
        &summary.title
    };

    Embed {
        title: truncate(title, MAX_TITLE_CHARS),
        url: document.url.clone(),
        color: EMBED_COLOR,
        timestamp: Utc::now().to_rfc3339(),
        author: EmbedAuthor {
            name: "arXiv",
            url: "https://arxiv.org/",
        },
        fields,
        footer: EmbedFooter {
            text: "paperpipe",
        },
    }
}

fn field(name: &'static str, value: String) -> EmbedField {
    // Discord rejects empty field values.
    let value = if value.trim().is_empty() {
        "-".to_string()
    } else {
        truncate(&value, MAX_FIELD_CHARS)
    };
    EmbedField {
        name,
        value,
        inline: false,
    }
}

/// Cut `text` to at most `max` characters, marking the cut with an ellipsis.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
