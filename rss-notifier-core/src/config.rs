use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::coordinator::{FailurePolicy, RunOptions};
use crate::error::ConfigError;
use crate::feed::FeedDescriptor;
use crate::fetcher::FetchConfig;
use crate::filter::FilterRule;
use crate::notifier::{MessageStyle, WebhookTarget};

/// Top-level YAML configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path of the seen-set ledger, relative to the working directory.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub poll: PollSettings,
    /// Webhook name -> URL, possibly containing `${VAR}` placeholders.
    #[serde(default)]
    pub webhooks: BTreeMap<String, String>,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
    /// Directory of the config file; keyword files resolve against it.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_state_file() -> PathBuf {
    PathBuf::from("data/seen.json")
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollSettings {
    /// Period of the watch loop.
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_timeout")]
    pub webhook_timeout_seconds: u64,
    /// Total attempts per feed request, including the first.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Feeds fetched at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_lock_stale")]
    pub lock_stale_seconds: u64,
}

fn default_interval() -> u64 {
    900
}

fn default_timeout() -> u64 {
    10
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_concurrency() -> usize {
    4
}

fn default_lock_stale() -> u64 {
    3600
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            request_timeout_seconds: default_timeout(),
            webhook_timeout_seconds: default_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            concurrency: default_concurrency(),
            lock_stale_seconds: default_lock_stale(),
        }
    }
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_seconds)
    }

    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_seconds)
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            request_timeout: Duration::from_secs(self.request_timeout_seconds),
            retry_attempts: self.retry_attempts.max(1),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// One or several regex patterns.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Patterns {
    One(String),
    Many(Vec<String>),
}

impl Patterns {
    fn as_slice(&self) -> &[String] {
        match self {
            Self::One(pattern) => std::slice::from_ref(pattern),
            Self::Many(patterns) => patterns,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub name: Option<String>,
    pub url: Option<String>,
    pub webhook: Option<String>,
    #[serde(default)]
    pub regex: Option<Patterns>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub keywords_file: Option<PathBuf>,
    #[serde(default)]
    pub style: MessageStyle,
}

/// Replace every `${VAR}` in `value` using `lookup`. An unknown variable is
/// an error; `${}` and an unterminated `${` are kept as written.
pub fn substitute_env_vars<F>(value: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        let name = &rest[start + 2..start + 2 + len];
        let end = start + 3 + len;
        if name.is_empty() {
            out.push_str(&rest[..end]);
            rest = &rest[end..];
            continue;
        }
        let resolved = lookup(name).ok_or_else(|| ConfigError::MissingEnvVar(name.to_owned()))?;
        out.push_str(&rest[..start]);
        out.push_str(&resolved);
        rest = &rest[end..];
    }
    out.push_str(rest);
    Ok(out)
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let config = Self::from_yaml_str(&text, base_dir)?;
        debug!(path = %path.display(), feeds = config.feeds.len(), "configuration loaded");
        Ok(config)
    }

    pub fn from_yaml_str(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(text)?;
        config.base_dir = base_dir.into();
        if config.feeds.is_empty() {
            return Err(ConfigError::NoFeeds);
        }
        Ok(config)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            failure_policy: self.failure_policy,
            concurrency: self.poll.concurrency.max(1),
        }
    }

    /// Resolve feeds using the process environment.
    pub fn resolve_feeds(&self) -> Result<Vec<FeedDescriptor>, ConfigError> {
        self.resolve_feeds_with(env_lookup)
    }

    /// Validate the configuration and build descriptors: webhook URLs are
    /// substituted and checked, filters compiled, keyword files read.
    pub fn resolve_feeds_with<F>(&self, lookup: F) -> Result<Vec<FeedDescriptor>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut webhooks = BTreeMap::new();
        for (name, raw) in &self.webhooks {
            let url = resolve_webhook_url(name, raw, &lookup)?;
            webhooks.insert(name.as_str(), url);
        }

        let mut descriptors = Vec::with_capacity(self.feeds.len());
        for (index, feed) in self.feeds.iter().enumerate() {
            let label = feed.name.clone().unwrap_or_else(|| format!("#{}", index));
            let missing = |field: &'static str| ConfigError::MissingField {
                feed: label.clone(),
                field,
            };

            let name = feed.name.clone().ok_or_else(|| missing("name"))?;
            let url = feed.url.clone().ok_or_else(|| missing("url"))?;
            let webhook_name = feed.webhook.clone().ok_or_else(|| missing("webhook"))?;
            let webhook_url =
                webhooks
                    .get(webhook_name.as_str())
                    .ok_or_else(|| ConfigError::UnknownWebhook {
                        feed: name.clone(),
                        webhook: webhook_name.clone(),
                    })?;

            let patterns = feed.regex.as_ref().map(Patterns::as_slice).unwrap_or_default();
            let mut filter = FilterRule::new(&feed.keywords, patterns)?;
            if let Some(file) = &feed.keywords_file {
                filter = filter.merge(FilterRule::load_keyword_file(self.base_dir.join(file))?);
            }
            if filter.is_empty() {
                warn!(feed = %name, "feed has no keywords or patterns and will never notify");
            }

            descriptors.push(FeedDescriptor {
                name,
                url,
                webhook: WebhookTarget {
                    name: webhook_name,
                    url: webhook_url.clone(),
                },
                filter,
                style: feed.style,
            });
        }

        Ok(descriptors)
    }
}

fn resolve_webhook_url<F>(name: &str, raw: &str, lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let resolved = substitute_env_vars(raw, lookup)?;
    let invalid = |reason: String| ConfigError::InvalidWebhookUrl {
        name: name.to_owned(),
        reason,
    };
    let parsed = Url::parse(&resolved).map_err(|e| invalid(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme `{}`", parsed.scheme())));
    }
    Ok(resolved)
}
