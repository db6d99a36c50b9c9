use std::fmt;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::feed::FeedEntry;

/// Fingerprint of a feed entry: lowercase hex SHA-1 of its identifying key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryIdentity(String);

impl EntryIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for EntryIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for EntryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The text an entry is keyed by: its id, else its link, else title followed
/// by published time (either may be empty).
pub fn identity_key(entry: &FeedEntry) -> String {
    fn present(field: &Option<String>) -> Option<&str> {
        field.as_deref().filter(|v| !v.is_empty())
    }

    if let Some(id) = present(&entry.id) {
        return id.to_owned();
    }
    if let Some(link) = present(&entry.link) {
        return link.to_owned();
    }
    let mut key = String::new();
    key.push_str(present(&entry.title).unwrap_or_default());
    key.push_str(present(&entry.published).unwrap_or_default());
    key
}

pub fn identify(entry: &FeedEntry) -> EntryIdentity {
    let digest = Sha1::digest(identity_key(entry).as_bytes());
    EntryIdentity(format!("{:x}", digest))
}

impl FeedEntry {
    pub fn identity(&self) -> EntryIdentity {
        identify(self)
    }
}
