//! Debug socket discovery.
//!
//! A debug-capable child creates an entry named `<prefix>-<pid>-<label>` in a
//! well-known directory. [`SocketRegistry`] finds those entries, waits for
//! them to appear, and deletes the ones whose owning process is gone.
//!
//! The directory is shared with unrelated processes that create and delete
//! entries at any time, so every operation re-reads it and a file vanishing
//! between listing and deleting is not an error.

pub mod entry;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use entry::{EntryName, EntryParser};

use crate::error::SocketError;
use crate::tracker::process::is_pid_alive;

/// Liveness verdict for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// The owning process is alive; the entry was left alone.
    InUse { pid: u32 },
    /// The entry was deleted. `owner` is `None` when the name was unparseable.
    Reclaimed { owner: Option<u32> },
}

/// Result of a [`SocketRegistry::reclaim_all_stale`] sweep.
#[derive(Debug, Default)]
pub struct ReclaimReport {
    pub in_use: Vec<PathBuf>,
    pub reclaimed: Vec<PathBuf>,
    /// Stale entries that could not be deleted.
    pub failed: Vec<(PathBuf, SocketError)>,
}

/// Fresh random label for a new debug session.
pub fn new_session_label() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Reader and janitor for one socket directory and entry prefix.
#[derive(Debug, Clone)]
pub struct SocketRegistry {
    dir: PathBuf,
    parser: EntryParser,
}

impl SocketRegistry {
    pub fn new(dir: impl Into<PathBuf>, prefix: &str) -> Result<Self, SocketError> {
        if prefix.is_empty() || prefix.contains('/') {
            return Err(SocketError::InvalidPrefix {
                prefix: prefix.to_string(),
                message: "must be non-empty and contain no '/'".to_string(),
            });
        }
        let parser = EntryParser::new(prefix).map_err(|e| SocketError::InvalidPrefix {
            prefix: prefix.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            dir: dir.into(),
            parser,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn parser(&self) -> &EntryParser {
        &self.parser
    }

    /// Create the socket directory if it does not exist.
    pub async fn ensure_directory(&self) -> Result<(), SocketError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| self.io_err(source))
    }

    /// Entries currently present, sorted by path. Reads the directory afresh on
    /// every call; a missing directory has no entries.
    pub async fn list_entries(&self) -> Result<Vec<PathBuf>, SocketError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(e)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| self.io_err(e))? {
            if self.parser.is_candidate(&entry.file_name().to_string_lossy()) {
                entries.push(entry.path());
            }
        }
        entries.sort();
        Ok(entries)
    }

    /// Keep `entry` if its owner is alive, otherwise delete it.
    /// Unparseable names are treated as stale.
    pub async fn check_and_reclaim(&self, entry: &Path) -> Result<EntryState, SocketError> {
        let owner = entry
            .file_name()
            .and_then(|name| self.parser.parse(&name.to_string_lossy()))
            .map(|parsed| parsed.pid);

        if let Some(pid) = owner {
            if is_pid_alive(pid) {
                return Ok(EntryState::InUse { pid });
            }
        }

        match tokio::fs::remove_file(entry).await {
            Ok(()) => info!(path = %entry.display(), owner = ?owner, "Reclaimed stale debug socket"),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %entry.display(), "Stale debug socket already gone");
            }
            Err(source) => {
                return Err(SocketError::Io {
                    path: entry.to_path_buf(),
                    source,
                });
            }
        }
        Ok(EntryState::Reclaimed { owner })
    }

    /// Apply [`check_and_reclaim`](Self::check_and_reclaim) to every entry.
    ///
    /// An entry that cannot be deleted is recorded in `failed` and the sweep
    /// moves on; only failing to read the directory is an error.
    pub async fn reclaim_all_stale(&self) -> Result<ReclaimReport, SocketError> {
        let mut report = ReclaimReport::default();
        for entry in self.list_entries().await? {
            match self.check_and_reclaim(&entry).await {
                Ok(EntryState::InUse { .. }) => report.in_use.push(entry),
                Ok(EntryState::Reclaimed { .. }) => report.reclaimed.push(entry),
                Err(e) => {
                    warn!(path = %entry.display(), "Failed to reclaim stale debug socket: {e}");
                    report.failed.push((entry, e));
                }
            }
        }
        Ok(report)
    }

    /// First entry whose name ends with `-<label>`. No liveness check.
    pub async fn find_for_session(&self, label: &str) -> Result<Option<PathBuf>, SocketError> {
        let suffix = format!("-{label}");
        Ok(self.list_entries().await?.into_iter().find(|path| {
            path.file_name()
                .is_some_and(|name| name.to_string_lossy().ends_with(&suffix))
        }))
    }

    /// First entry whose pid component is `pid`. No liveness check.
    pub async fn find_for_pid(&self, pid: u32) -> Result<Option<PathBuf>, SocketError> {
        Ok(self.list_entries().await?.into_iter().find(|path| {
            path.file_name()
                .and_then(|name| self.parser.parse(&name.to_string_lossy()))
                .is_some_and(|parsed| parsed.pid == pid)
        }))
    }

    /// Poll for the entry of `label` until it appears or `timeout` elapses.
    ///
    /// Checks immediately, then every `poll_interval`. The last check happens
    /// at the deadline; anything appearing after it is not seen.
    pub async fn wait_for_session(
        &self,
        label: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<PathBuf, SocketError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(path) = self.find_for_session(label).await? {
                debug!(label, path = %path.display(), "Debug socket found");
                return Ok(path);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(self.not_found(format!("session `{label}`")).await);
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// Poll for an entry owned by `pid`: one immediate check plus up to
    /// `retries` more, `interval` apart.
    pub async fn wait_for_pid(
        &self,
        pid: u32,
        retries: u32,
        interval: Duration,
    ) -> Result<PathBuf, SocketError> {
        for attempt in 0..=retries {
            if let Some(path) = self.find_for_pid(pid).await? {
                debug!(pid, attempt, path = %path.display(), "Debug socket found");
                return Ok(path);
            }
            if attempt < retries {
                tokio::time::sleep(interval).await;
            }
        }
        Err(self.not_found(format!("pid {pid}")).await)
    }

    /// Reclaim the session's entry if its owner is dead, then report whatever
    /// entry exists for the label now.
    pub async fn reclaim_session_if_stale(
        &self,
        label: &str,
    ) -> Result<Option<PathBuf>, SocketError> {
        if let Some(entry) = self.find_for_session(label).await? {
            self.check_and_reclaim(&entry).await?;
        }
        self.find_for_session(label).await
    }

    async fn not_found(&self, target: String) -> SocketError {
        let listing = self
            .list_entries()
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        SocketError::NotFound {
            target,
            dir: self.dir.clone(),
            listing,
        }
    }

    fn io_err(&self, source: std::io::Error) -> SocketError {
        SocketError::Io {
            path: self.dir.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rejects_empty_or_path_prefix() {
        assert!(SocketRegistry::new("/tmp", "").is_err());
        assert!(SocketRegistry::new("/tmp", "a/b").is_err());
    }

    #[test]
    fn session_labels_are_unique() {
        let a = new_session_label();
        let b = new_session_label();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn ensure_directory_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let registry = SocketRegistry::new(tmp.path().join("sockets"), "dbg").unwrap();
        registry.ensure_directory().await.unwrap();
        registry.ensure_directory().await.unwrap();
        assert!(registry.dir().is_dir());
    }

    #[tokio::test]
    async fn missing_directory_lists_nothing() {
        let tmp = TempDir::new().unwrap();
        let registry = SocketRegistry::new(tmp.path().join("absent"), "dbg").unwrap();
        assert!(registry.list_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn vanished_entry_still_counts_as_reclaimed() {
        let tmp = TempDir::new().unwrap();
        let registry = SocketRegistry::new(tmp.path(), "dbg").unwrap();
        let ghost = tmp.path().join("dbg-2000000000-gone");
        let state = registry.check_and_reclaim(&ghost).await.unwrap();
        assert_eq!(state, EntryState::Reclaimed { owner: Some(2_000_000_000) });
    }
}
