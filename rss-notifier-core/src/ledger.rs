use std::collections::HashSet;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::identity::EntryIdentity;

/// Identities already processed plus the time of the last committed run.
///
/// Identities can be added but never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenSet {
    seen: HashSet<EntryIdentity>,
    last_run: Option<DateTime<Utc>>,
}

impl SeenSet {
    pub fn contains(&self, identity: &EntryIdentity) -> bool {
        self.seen.contains(identity)
    }

    /// Returns `false` if the identity was already present.
    pub fn insert(&mut self, identity: EntryIdentity) -> bool {
        self.seen.insert(identity)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntryIdentity> {
        self.seen.iter()
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    pub fn stamp(&mut self, at: DateTime<Utc>) {
        self.last_run = Some(at);
    }
}

impl Extend<EntryIdentity> for SeenSet {
    fn extend<T: IntoIterator<Item = EntryIdentity>>(&mut self, iter: T) {
        self.seen.extend(iter);
    }
}

// On-disk layout: {"seen": [...], "last_run": "..." | null}
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    seen: Vec<String>,
    #[serde(default)]
    last_run: Option<String>,
}

impl From<LedgerFile> for SeenSet {
    fn from(file: LedgerFile) -> Self {
        let last_run = file.last_run.as_deref().and_then(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| warn!(value = %raw, error = %e, "ignoring unparsable last_run"))
                .ok()
        });
        Self {
            seen: file.seen.into_iter().map(EntryIdentity::from).collect(),
            last_run,
        }
    }
}

impl From<&SeenSet> for LedgerFile {
    fn from(set: &SeenSet) -> Self {
        let mut seen: Vec<String> = set.seen.iter().map(|id| id.as_str().to_owned()).collect();
        seen.sort_unstable();
        Self {
            seen,
            last_run: set.last_run.map(|dt| dt.to_rfc3339()),
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LedgerError {
    let path = path.to_path_buf();
    move |source| LedgerError::Io { path, source }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// File-backed store for the [`SeenSet`].
#[derive(Debug, Clone)]
pub struct SeenStore {
    path: PathBuf,
    lock_stale_after: Duration,
}

impl SeenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_stale_after: Duration::from_secs(3600),
        }
    }

    pub fn with_lock_stale_after(mut self, stale_after: Duration) -> Self {
        self.lock_stale_after = stale_after;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the ledger. A missing or unreadable file is an empty ledger so a
    /// run can always make progress.
    pub async fn load(&self) -> SeenSet {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.kind() == std::io::ErrorKind::NotFound {
                    debug!(path = %self.path.display(), "no ledger yet; starting empty");
                } else {
                    warn!(error = %e, path = %self.path.display(), "failed to read ledger; starting empty");
                }
                return SeenSet::default();
            }
        };
        match serde_json::from_slice::<LedgerFile>(&bytes) {
            Ok(file) => file.into(),
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "failed to parse ledger; starting empty");
                SeenSet::default()
            }
        }
    }

    /// Atomically replace the ledger: write a temp file next to it, sync,
    /// then rename over the original. A failed write removes the temp file.
    pub async fn save(&self, set: &SeenSet) -> Result<(), LedgerError> {
        let bytes = serde_json::to_vec_pretty(&LedgerFile::from(set))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err(parent))?;
        }

        let tmp = with_suffix(&self.path, ".tmp");
        if let Err(e) = write_synced(&tmp, &bytes).await {
            discard_tmp(&tmp).await;
            return Err(io_err(&tmp)(e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            discard_tmp(&tmp).await;
            return Err(io_err(&self.path)(e));
        }
        debug!(path = %self.path.display(), entries = set.len(), "ledger saved");
        Ok(())
    }

    /// Take the single-writer lock for this ledger. A lock file older than
    /// the staleness threshold is assumed to be left over from a crash and
    /// is replaced.
    pub async fn lock(&self) -> Result<LedgerLock, LedgerError> {
        let lock_path = with_suffix(&self.path, ".lock");
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err(parent))?;
        }

        let token = lock_token();
        match create_lock_file(&lock_path, &token).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                self.break_stale_lock(&lock_path, &token).await?;
            }
            Err(e) => return Err(io_err(&lock_path)(e)),
        }

        debug!(path = %lock_path.display(), "ledger lock acquired");
        Ok(LedgerLock {
            path: lock_path,
            token,
        })
    }

    // Only the run holding `<lock>.break` may replace a stale lock, so two
    // runs cannot both remove it and each create their own.
    async fn break_stale_lock(&self, lock_path: &Path, token: &str) -> Result<(), LedgerError> {
        let locked = || LedgerError::Locked(lock_path.to_path_buf());
        if !self.is_stale(lock_path).await {
            return Err(locked());
        }

        let breaker = with_suffix(lock_path, ".break");
        match create_lock_file(&breaker, token).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if self.is_stale(&breaker).await {
                    warn!(path = %breaker.display(), "removing abandoned lock breaker");
                    remove_if_present(&breaker).await?;
                }
                return Err(locked());
            }
            Err(e) => return Err(io_err(&breaker)(e)),
        }

        let result = self.replace_stale_lock(lock_path, token).await;
        if let Err(e) = remove_if_present(&breaker).await {
            warn!(error = %e, "failed to remove lock breaker");
        }
        result
    }

    async fn replace_stale_lock(&self, lock_path: &Path, token: &str) -> Result<(), LedgerError> {
        // another run may have replaced it before we took the breaker
        if !self.is_stale(lock_path).await {
            return Err(LedgerError::Locked(lock_path.to_path_buf()));
        }
        warn!(path = %lock_path.display(), "breaking stale ledger lock");
        remove_if_present(lock_path).await?;
        create_lock_file(lock_path, token).await.map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                LedgerError::Locked(lock_path.to_path_buf())
            } else {
                io_err(lock_path)(e)
            }
        })
    }

    async fn is_stale(&self, lock_path: &Path) -> bool {
        match tokio::fs::metadata(lock_path).await.and_then(|m| m.modified()) {
            Ok(modified) => {
                let age = SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or(Duration::ZERO);
                age >= self.lock_stale_after
            }
            // vanished between the failed create and now
            Err(_) => true,
        }
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

async fn discard_tmp(tmp: &Path) {
    if let Err(e) = remove_if_present(tmp).await {
        warn!(error = %e, "failed to remove temporary ledger file");
    }
}

async fn remove_if_present(path: &Path) -> Result<(), LedgerError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path)(e)),
    }
}

fn lock_token() -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    format!(
        "pid={} at={} seq={}\n",
        std::process::id(),
        Utc::now().to_rfc3339(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    )
}

async fn create_lock_file(path: &Path, token: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(token.as_bytes()).await?;
    file.flush().await
}

/// Held for the duration of a cycle; removes the lock file when dropped,
/// unless another run has taken it over since.
#[derive(Debug)]
pub struct LedgerLock {
    path: PathBuf,
    token: String,
}

impl LedgerLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        match std::fs::read_to_string(&self.path) {
            Ok(owner) if owner == self.token => match std::fs::remove_file(&self.path) {
                Ok(()) => debug!(path = %self.path.display(), "ledger lock released"),
                Err(e) => warn!(error = %e, path = %self.path.display(), "failed to release ledger lock"),
            },
            Ok(_) => warn!(path = %self.path.display(), "ledger lock was taken over; leaving it in place"),
            Err(e) => info!(error = %e, path = %self.path.display(), "ledger lock already gone"),
        }
    }
}
