use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("configuration has no feeds")]
    NoFeeds,
    #[error("feed {feed} is missing required field `{field}`")]
    MissingField { feed: String, field: &'static str },
    #[error("feed {feed} references undefined webhook `{webhook}`")]
    UnknownWebhook { feed: String, webhook: String },
    #[error("required environment variable not set: {0}")]
    MissingEnvVar(String),
    #[error("invalid webhook URL for `{name}`: {reason}")]
    InvalidWebhookUrl { name: String, reason: String },
    #[error("invalid regex pattern `{pattern}`: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to read keyword file {path}: {source}")]
    KeywordFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),
    #[error("failed to read feed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("feed parsing error: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("webhook request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("webhook responded with status {0}")]
    Status(reqwest::StatusCode),
    #[error("no webhook URL provided for `{0}`")]
    MissingUrl(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("ledger {0} is locked by another run")]
    Locked(PathBuf),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to process feed {feed}: {source}")]
    Fetch {
        feed: String,
        #[source]
        source: PollError,
    },
    #[error("failed to deliver match for feed {feed}: {source}")]
    Delivery {
        feed: String,
        #[source]
        source: DeliveryError,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("scheduler task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
