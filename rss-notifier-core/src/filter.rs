//! Keyword and regex filters deciding which new entries trigger a notification.

use std::path::Path;

use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::feed::FeedEntry;

/// Line prefix marking a regex in keyword files.
const REGEX_PREFIX: &str = "r:";

/// Compiled keyword/regex predicate.
///
/// Keywords are case-insensitive substrings, regexes are case-insensitive
/// searches, and any single hit is a match. A rule with neither never matches.
#[derive(Debug, Clone, Default)]
pub struct FilterRule {
    keywords: Vec<String>,
    regexes: Vec<Regex>,
}

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

impl FilterRule {
    /// Build a rule from configuration. Any invalid pattern is an error.
    pub fn new<K, P>(keywords: K, patterns: P) -> Result<Self, ConfigError>
    where
        K: IntoIterator,
        K::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|kw| kw.as_ref().trim().to_lowercase())
            .filter(|kw| !kw.is_empty())
            .collect();
        let regexes = patterns
            .into_iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                compile(pattern).map_err(|source| ConfigError::InvalidRegex {
                    pattern: pattern.to_owned(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { keywords, regexes })
    }

    /// Parse the keyword file format, skipping lines that cannot be used
    /// instead of rejecting the whole file.
    ///
    /// Blank lines and `#` comments are ignored, `r:<pattern>` lines are
    /// regexes and every other line is a keyword.
    pub fn from_keyword_source(source: &str) -> Self {
        let mut rule = Self::default();
        for (index, raw) in source.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.strip_prefix(REGEX_PREFIX) {
                Some(pattern) => {
                    let pattern = pattern.trim();
                    if pattern.is_empty() {
                        continue;
                    }
                    match compile(pattern) {
                        Ok(regex) => rule.regexes.push(regex),
                        Err(err) => {
                            warn!(line = index + 1, %pattern, error = %err, "skipping invalid regex in keyword file");
                        }
                    }
                }
                None => rule.keywords.push(line.to_lowercase()),
            }
        }
        rule
    }

    /// Load a keyword file. A missing file gives an empty rule; other read
    /// failures are configuration errors.
    pub fn load_keyword_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::from_keyword_source(&text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "keyword file not found; no keywords loaded");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::KeywordFile {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn merge(mut self, other: FilterRule) -> Self {
        self.keywords.extend(other.keywords);
        self.regexes.extend(other.regexes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty() && self.regexes.is_empty()
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.regexes.iter().map(Regex::as_str)
    }

    pub fn matches(&self, entry: &FeedEntry) -> bool {
        if self.is_empty() {
            return false;
        }
        self.matches_text(&searchable_text(entry))
    }

    pub fn matches_text(&self, text: &str) -> bool {
        if !self.keywords.is_empty() {
            let lowered = text.to_lowercase();
            if let Some(kw) = self.keywords.iter().find(|kw| lowered.contains(kw.as_str())) {
                debug!(keyword = %kw, "keyword matched");
                return true;
            }
        }
        if let Some(re) = self.regexes.iter().find(|re| re.is_match(text)) {
            debug!(pattern = %re.as_str(), "regex matched");
            return true;
        }
        false
    }
}

/// Title, summary and description joined by newlines, skipping empty fields.
pub fn searchable_text(entry: &FeedEntry) -> String {
    [&entry.title, &entry.summary, &entry.description]
        .into_iter()
        .filter_map(|field| field.as_deref())
        .filter(|value| !value.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
