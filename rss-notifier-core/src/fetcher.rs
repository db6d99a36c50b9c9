use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{redirect, Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use crate::error::PollError;
use crate::feed::FeedEntry;

const MAX_REDIRECTS: usize = 5;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch and parse the feed at `url`. A feed without items is an empty
    /// list, not an error.
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>, PollError>;
}

#[derive(Debug, Clone, Copy)]
pub struct FetchConfig {
    pub request_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Fetches feeds over HTTP(S), or from disk for `file://` URLs and plain paths.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: FetchConfig,
}

enum Source {
    Remote(Url),
    Local(PathBuf),
}

fn classify(url: &str) -> Source {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Source::Remote(parsed),
        Ok(parsed) if parsed.scheme() == "file" => match parsed.to_file_path() {
            Ok(path) => Source::Local(path),
            Err(()) => Source::Local(PathBuf::from(parsed.path())),
        },
        _ => Source::Local(PathBuf::from(url)),
    }
}

fn is_retryable(err: &PollError) -> bool {
    match err {
        PollError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        PollError::Status(status) => {
            status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
        }
        PollError::Io(_) | PollError::Parse(_) => false,
    }
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(concat!("rss-notifier/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    async fn get_once(&self, url: &Url) -> Result<Bytes, PollError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status(status));
        }
        Ok(response.bytes().await?)
    }

    async fn get_with_retries(&self, url: &Url) -> Result<Bytes, PollError> {
        let attempts = self.config.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.get_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) if attempt < attempts && is_retryable(&err) => {
                    let delay = self.config.retry_backoff * attempt;
                    warn!(%url, attempt, error = %err, ?delay, "feed request failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn read_source(&self, url: &str) -> Result<Bytes, PollError> {
        match classify(url) {
            Source::Remote(url) => self.get_with_retries(&url).await,
            Source::Local(path) => {
                debug!(path = %path.display(), "reading feed from disk");
                Ok(Bytes::from(tokio::fs::read(&path).await?))
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>, PollError> {
        let bytes = self.read_source(url).await?;
        let entries = parse_feed(&bytes)?;
        debug!(%url, entries = entries.len(), "feed fetched");
        Ok(entries)
    }
}

/// Parse an RSS 2.0 or Atom document. Blank input gives no entries.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<FeedEntry>, PollError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let rss_err = match rss::Channel::read_from(bytes) {
        Ok(channel) => {
            return Ok(channel.items().iter().map(FeedEntry::from_rss_item).collect());
        }
        Err(e) => e,
    };

    match atom_syndication::Feed::read_from(bytes) {
        Ok(feed) => Ok(feed.entries().iter().map(FeedEntry::from_atom_entry).collect()),
        Err(atom_err) => Err(PollError::Parse(format!(
            "not an RSS feed ({}) nor an Atom feed ({})",
            rss_err, atom_err
        ))),
    }
}
