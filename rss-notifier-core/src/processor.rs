use std::collections::HashSet;

use tracing::debug;

use crate::feed::{FeedDescriptor, FeedEntry};
use crate::identity::EntryIdentity;
use crate::ledger::SeenSet;

/// Entries from one fetch that were not in the ledger, and the subset of
/// those that passed the feed's filter.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    pub new_entries: Vec<(EntryIdentity, FeedEntry)>,
    pub matched_entries: Vec<(EntryIdentity, FeedEntry)>,
}

impl ProcessOutcome {
    pub fn new_identities(&self) -> impl Iterator<Item = &EntryIdentity> {
        self.new_entries.iter().map(|(id, _)| id)
    }
}

/// Split fetched entries into new and new-and-matching, in source order.
///
/// `seen` is only read. An entry listed twice in one fetch counts once.
pub fn process(
    descriptor: &FeedDescriptor,
    entries: Vec<FeedEntry>,
    seen: &SeenSet,
) -> ProcessOutcome {
    let mut outcome = ProcessOutcome::default();
    let mut batch: HashSet<EntryIdentity> = HashSet::new();

    for entry in entries {
        let identity = entry.identity();
        if seen.contains(&identity) || !batch.insert(identity.clone()) {
            debug!(feed = %descriptor.name, %identity, "skipping seen entry");
            continue;
        }

        if descriptor.filter.matches(&entry) {
            debug!(feed = %descriptor.name, %identity, title = ?entry.title, "entry matched");
            outcome.matched_entries.push((identity.clone(), entry.clone()));
        }
        outcome.new_entries.push((identity, entry));
    }

    outcome
}
