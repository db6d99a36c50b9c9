use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{PollError, RunError};
use crate::feed::FeedDescriptor;
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::identity::EntryIdentity;
use crate::ledger::{SeenSet, SeenStore};
use crate::notifier::{Message, Notifier, WebhookNotifier};
use crate::processor::{process, ProcessOutcome};

/// What to do when one feed fails during a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log the failure, leave that feed's entries uncommitted and carry on
    /// with the others.
    #[default]
    Isolate,
    /// Fail the whole cycle without committing anything.
    Abort,
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub failure_policy: FailurePolicy,
    pub concurrency: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedReport {
    pub name: String,
    pub new: usize,
    pub matched: usize,
    pub delivered: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Fetch,
    Delivery,
}

#[derive(Debug, Clone)]
pub struct FeedFailure {
    pub feed: String,
    pub stage: FailureStage,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub feeds: Vec<FeedReport>,
    pub failures: Vec<FeedFailure>,
    /// Identities added to the ledger by this cycle.
    pub committed: usize,
}

impl RunReport {
    pub fn matched(&self) -> usize {
        self.feeds.iter().map(|f| f.matched).sum()
    }

    pub fn delivered(&self) -> usize {
        self.feeds.iter().map(|f| f.delivered).sum()
    }
}

/// Drives polling cycles. Owns the ledger for the duration of a cycle and
/// commits it once at the end.
pub struct RunCoordinator<F, N> {
    fetcher: F,
    notifier: N,
    store: SeenStore,
    options: RunOptions,
}

impl RunCoordinator<HttpFetcher, WebhookNotifier> {
    pub fn from_config(config: &Config) -> Result<Self, RunError> {
        let fetcher = HttpFetcher::new(config.poll.fetch_config())?;
        let notifier = WebhookNotifier::new(config.poll.webhook_timeout())?;
        let store = SeenStore::new(&config.state_file)
            .with_lock_stale_after(config.poll.lock_stale_after());
        Ok(Self::new(fetcher, notifier, store, config.run_options()))
    }
}

impl<F: Fetcher, N: Notifier> RunCoordinator<F, N> {
    pub fn new(fetcher: F, notifier: N, store: SeenStore, options: RunOptions) -> Self {
        Self {
            fetcher,
            notifier,
            store,
            options,
        }
    }

    pub fn store(&self) -> &SeenStore {
        &self.store
    }

    async fn fetch_and_process(
        &self,
        feed: &FeedDescriptor,
        seen: &SeenSet,
    ) -> Result<ProcessOutcome, PollError> {
        let entries = self.fetcher.fetch(&feed.url).await?;
        let fetched = entries.len();
        let outcome = process(feed, entries, seen);
        info!(
            feed = %feed.name,
            fetched,
            new = outcome.new_entries.len(),
            matched = outcome.matched_entries.len(),
            "processed feed"
        );
        Ok(outcome)
    }

    /// Run one full cycle over `feeds`.
    ///
    /// Fetching runs concurrently; deliveries happen afterwards in feed
    /// order and the ledger is saved once, after every delivery was attempted.
    pub async fn run_cycle(&self, feeds: &[FeedDescriptor]) -> Result<RunReport, RunError> {
        let _lock = self.store.lock().await?;
        let mut seen = self.store.load().await;
        info!(feeds = feeds.len(), seen = seen.len(), last_run = ?seen.last_run(), "starting cycle");

        let pending: Vec<BoxFuture<'_, Result<ProcessOutcome, PollError>>> = feeds
            .iter()
            .map(|feed| self.fetch_and_process(feed, &seen).boxed())
            .collect();
        let results: Vec<_> = stream::iter(pending)
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await;

        let policy = self.options.failure_policy;
        let mut report = RunReport::default();
        let mut processed = Vec::with_capacity(feeds.len());
        for (feed, result) in feeds.iter().zip(results) {
            match result {
                Ok(outcome) => processed.push((feed, outcome)),
                Err(source) => {
                    error!(feed = %feed.name, url = %feed.url, error = %source, "failed to fetch feed");
                    if policy == FailurePolicy::Abort {
                        return Err(RunError::Fetch {
                            feed: feed.name.clone(),
                            source,
                        });
                    }
                    report.failures.push(FeedFailure {
                        feed: feed.name.clone(),
                        stage: FailureStage::Fetch,
                        error: source.to_string(),
                    });
                }
            }
        }

        let total_new: usize = processed.iter().map(|(_, o)| o.new_entries.len()).sum();
        let total_matched: usize = processed.iter().map(|(_, o)| o.matched_entries.len()).sum();
        if total_matched == 0 {
            info!(new = total_new, "no new matching entries");
        } else {
            info!(matched = total_matched, new = total_new, "delivering matching entries");
        }

        // Identities of failed feeds stay out of the ledger even when another
        // feed carried the same entry, so the failed webhook gets them next cycle.
        let failed_urls: HashSet<&str> = report
            .failures
            .iter()
            .filter_map(|failure| feeds.iter().find(|f| f.name == failure.feed))
            .map(|feed| feed.url.as_str())
            .collect();
        let mut withheld: HashSet<EntryIdentity> = HashSet::new();
        let mut to_commit: Vec<EntryIdentity> = Vec::with_capacity(total_new);
        for (feed, outcome) in processed {
            let mut delivered = 0;
            let mut failure = None;
            for (identity, entry) in &outcome.matched_entries {
                let message = Message::for_entry(feed.style, entry);
                match self.notifier.deliver(&feed.webhook, &message).await {
                    Ok(()) => {
                        delivered += 1;
                        info!(
                            feed = %feed.name,
                            webhook = %feed.webhook.name,
                            %identity,
                            title = entry.title.as_deref().unwrap_or("(no title)"),
                            "sent notification"
                        );
                    }
                    Err(source) => {
                        error!(feed = %feed.name, webhook = %feed.webhook.name, error = %source, "delivery failed");
                        if policy == FailurePolicy::Abort {
                            return Err(RunError::Delivery {
                                feed: feed.name.clone(),
                                source,
                            });
                        }
                        failure = Some(source);
                        break;
                    }
                }
            }

            report.feeds.push(FeedReport {
                name: feed.name.clone(),
                new: outcome.new_entries.len(),
                matched: outcome.matched_entries.len(),
                delivered,
            });
            let identities = outcome.new_entries.into_iter().map(|(id, _)| id);
            match failure {
                Some(source) => {
                    warn!(feed = %feed.name, "feed left uncommitted; its entries will be retried");
                    report.failures.push(FeedFailure {
                        feed: feed.name.clone(),
                        stage: FailureStage::Delivery,
                        error: source.to_string(),
                    });
                    withheld.extend(identities);
                }
                None if failed_urls.contains(feed.url.as_str()) => withheld.extend(identities),
                None => to_commit.extend(identities),
            }
        }

        let before = seen.len();
        seen.extend(to_commit.into_iter().filter(|id| !withheld.contains(id)));
        report.committed = seen.len() - before;

        // last_run records the last cycle in which every feed succeeded.
        let clean = report.failures.is_empty();
        if clean {
            seen.stamp(Utc::now());
        }
        if clean || report.committed > 0 {
            self.store.save(&seen).await?;
        } else {
            warn!(failures = report.failures.len(), "nothing to commit; ledger left untouched");
        }

        info!(
            committed = report.committed,
            seen = seen.len(),
            delivered = report.delivered(),
            failures = report.failures.len(),
            "cycle complete"
        );
        Ok(report)
    }
}

/// Load the configuration at `config_path` and run a single cycle with the
/// HTTP fetcher and webhook notifier.
pub async fn run_once(config_path: impl AsRef<Path>) -> Result<RunReport, RunError> {
    let config = Config::load(config_path)?;
    let feeds = config.resolve_feeds()?;
    let coordinator = RunCoordinator::from_config(&config)?;
    coordinator.run_cycle(&feeds).await
}
