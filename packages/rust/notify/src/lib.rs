//! Outbound notifications.
//!
//! A [`Notifier`] posts one message at a time to a notification channel and
//! reports whether the channel accepted it. [`DiscordWebhook`] is the
//! Discord implementation.

mod discord;

use async_trait::async_trait;
use paperpipe_shared::{Document, Result, SummaryRecord};

pub use discord::DiscordWebhook;

/// A message to post.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Heads-up that `count` new items are about to follow.
    Announcement { count: usize },
    /// One summarized document.
    Item {
        document: Document,
        summary: SummaryRecord,
    },
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Announcement { .. } => "announcement",
            Self::Item { .. } => "item",
        }
    }
}

/// A notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post a message. `Ok` means the channel acknowledged it.
    async fn post(&self, message: &OutboundMessage) -> Result<()>;
}
