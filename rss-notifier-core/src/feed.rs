use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::filter::FilterRule;
use crate::notifier::{MessageStyle, WebhookTarget};

/// A feed after configuration has been resolved: webhook URL substituted and
/// filters compiled. Built once per run.
#[derive(Debug, Clone)]
pub struct FeedDescriptor {
    pub name: String,
    pub url: String,
    pub webhook: WebhookTarget,
    pub filter: FilterRule,
    pub style: MessageStyle,
}

/// One item from a syndication feed. Every field is optional; parsers store
/// empty strings as `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedEntry {
    pub id: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub published: Option<String>,
    pub thumbnail: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(ToOwned::to_owned)
}

impl FeedEntry {
    pub fn from_rss_item(item: &rss::Item) -> Self {
        // media:thumbnail first, then an image enclosure
        let thumbnail = item
            .extensions()
            .get("media")
            .and_then(|media| media.get("thumbnail"))
            .and_then(|thumbs| thumbs.first())
            .and_then(|thumb| thumb.attrs().get("url").cloned())
            .or_else(|| {
                item.enclosure()
                    .filter(|enc| enc.mime_type().starts_with("image/"))
                    .map(|enc| enc.url().to_owned())
            });

        Self {
            id: non_empty(item.guid().map(|guid| guid.value())),
            link: non_empty(item.link()),
            title: non_empty(item.title()),
            summary: non_empty(item.description()),
            description: non_empty(item.content()),
            published: non_empty(item.pub_date()),
            thumbnail: thumbnail.filter(|url| !url.is_empty()),
        }
    }

    pub fn from_atom_entry(entry: &atom_syndication::Entry) -> Self {
        // rel="alternate" is the default when rel is omitted
        let link = entry
            .links()
            .iter()
            .find(|link| link.rel() == "alternate")
            .or_else(|| entry.links().first())
            .map(|link| link.href());

        let thumbnail = entry
            .extensions()
            .get("media")
            .and_then(|media| media.get("thumbnail"))
            .and_then(|thumbs| thumbs.first())
            .and_then(|thumb| thumb.attrs().get("url").cloned());

        Self {
            id: non_empty(Some(entry.id())),
            link: non_empty(link),
            title: non_empty(Some(entry.title().value.as_str())),
            summary: non_empty(entry.summary().map(|text| text.value.as_str())),
            description: non_empty(entry.content().and_then(|content| content.value())),
            published: entry.published().map(|dt| dt.to_rfc3339()),
            thumbnail: thumbnail.filter(|url| !url.is_empty()),
        }
    }

    /// Publication time parsed from the raw `published` string, accepting the
    /// RFC 2822 dates used by RSS and the RFC 3339 dates used by Atom.
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.published.as_deref()?.trim();
        DateTime::parse_from_rfc2822(raw)
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}
