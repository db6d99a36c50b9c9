pub mod config;
pub mod coordinator;
pub mod error;
pub mod feed;
pub mod fetcher;
pub mod filter;
pub mod identity;
pub mod ledger;
pub mod notifier;
pub mod processor;
pub mod scheduler;

pub use config::{Config, FeedConfig, PollSettings};
pub use coordinator::{
    run_once, FailurePolicy, FailureStage, FeedFailure, FeedReport, RunCoordinator, RunOptions,
    RunReport,
};
pub use error::{ConfigError, DeliveryError, LedgerError, PollError, RunError};
pub use feed::{FeedDescriptor, FeedEntry};
pub use fetcher::{parse_feed, FetchConfig, Fetcher, HttpFetcher};
pub use filter::{searchable_text, FilterRule};
pub use identity::{identify, EntryIdentity};
pub use ledger::{LedgerLock, SeenSet, SeenStore};
pub use notifier::{Embed, EmbedImage, Message, MessageStyle, Notifier, WebhookNotifier, WebhookTarget};
pub use processor::{process, ProcessOutcome};
pub use scheduler::{spawn_scheduler, SchedulerHandle};
