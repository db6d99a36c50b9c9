use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::DeliveryError;
use crate::feed::FeedEntry;

const EMBED_TITLE_LIMIT: usize = 256;
const EMBED_DESCRIPTION_LIMIT: usize = 300;

/// A named webhook with its URL after environment substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTarget {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStyle {
    #[default]
    Text,
    Embed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<EmbedImage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedImage {
    pub url: String,
}

/// Formatted notification for one matched entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Embed(Embed),
}

/// Shorten `value` to at most `limit` chars, the trailing `…` included.
fn truncate(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_owned();
    }
    let keep = limit.saturating_sub(1);
    let cut = value.char_indices().nth(keep).map_or(value.len(), |(i, _)| i);
    format!("{}…", &value[..cut])
}

impl Message {
    pub fn for_entry(style: MessageStyle, entry: &FeedEntry) -> Self {
        match style {
            MessageStyle::Text => Self::text(entry),
            MessageStyle::Embed => Self::embed(entry),
        }
    }

    pub fn text(entry: &FeedEntry) -> Self {
        let title = entry.title.as_deref().unwrap_or("(no title)");
        let link = entry.link.as_deref().unwrap_or_default();
        Self::Text(format!("**{}**\n{}", title, link))
    }

    pub fn embed(entry: &FeedEntry) -> Self {
        Self::Embed(Embed {
            title: Some(truncate(
                entry.title.as_deref().unwrap_or("(no title)"),
                EMBED_TITLE_LIMIT,
            )),
            url: entry.link.clone(),
            description: entry
                .summary
                .as_deref()
                .map(|summary| truncate(summary.trim(), EMBED_DESCRIPTION_LIMIT)),
            timestamp: entry.published_at(),
            thumbnail: entry.thumbnail.clone().map(|url| EmbedImage { url }),
        })
    }

    /// JSON body for a Discord-compatible webhook.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::Text(content) => json!({ "content": content }),
            Self::Embed(embed) => json!({ "embeds": [embed] }),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, target: &WebhookTarget, message: &Message)
        -> Result<(), DeliveryError>;
}

/// Posts messages to webhooks over HTTP. Any non-2xx response fails the
/// delivery.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rss-notifier/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(
        &self,
        target: &WebhookTarget,
        message: &Message,
    ) -> Result<(), DeliveryError> {
        if target.url.is_empty() {
            return Err(DeliveryError::MissingUrl(target.name.clone()));
        }
        let response = self
            .client
            .post(&target.url)
            .json(&message.payload())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status(status));
        }
        debug!(webhook = %target.name, %status, "webhook delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 3), "hé…");
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exact", 5), "exact");
    }

    #[test]
    fn test_embed_fields_stay_within_limits() {
        let entry = FeedEntry {
            title: Some("t".repeat(300)),
            summary: Some("é".repeat(400)),
            ..Default::default()
        };
        let Message::Embed(embed) = Message::embed(&entry) else {
            panic!("expected an embed");
        };
        let title = embed.title.unwrap();
        assert_eq!(title.chars().count(), EMBED_TITLE_LIMIT);
        assert!(title.ends_with('…'));
        let description = embed.description.unwrap();
        assert_eq!(description.chars().count(), EMBED_DESCRIPTION_LIMIT);
    }
}
