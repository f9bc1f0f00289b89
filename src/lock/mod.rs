//! File-backed named locks.
//!
//! A lock is a file created with create-exclusive semantics; its existence is
//! the lock. There is no content handshake and no lease, so a holder that dies
//! without releasing leaves the resource locked until someone removes the file
//! by hand.
//!
//! [`LockManager::try_acquire`] never retries. Callers that want to wait use
//! [`LockManager::acquire_with_backoff`], which loops over the single-shot
//! primitive with an exponential [`Backoff`].

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::LockError;

const LOCK_EXTENSION: &str = "lock";

/// Floor for every retry delay; a zero delay would spin on the filesystem.
const MIN_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Exponential backoff used when waiting for a contended lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the second attempt.
    pub initial: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Total time budget before giving up with [`LockError::Contention`].
    pub max_wait: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(25),
            max_delay: Duration::from_millis(400),
            max_wait: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// Delay to sleep after the given (zero-based) failed attempt. Never
    /// shorter than one millisecond, whatever the configured values.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial
            .saturating_mul(factor)
            .min(self.max_delay)
            .max(MIN_RETRY_DELAY)
    }
}

/// Hands out presence-based locks stored as files in one directory.
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
}

impl LockManager {
    /// Create a manager rooted at `dir`. The directory is created lazily on
    /// the first acquisition.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the lock files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the lock file for `resource`.
    pub fn lock_path(&self, resource: &str) -> PathBuf {
        self.dir.join(format!("{resource}.{LOCK_EXTENSION}"))
    }

    /// True if a lock file for `resource` currently exists.
    pub async fn is_locked(&self, resource: &str) -> bool {
        tokio::fs::try_exists(self.lock_path(resource))
            .await
            .unwrap_or(false)
    }

    /// Try once to acquire `resource`.
    ///
    /// Fails with [`LockError::Contention`] if the lock file already exists.
    /// Any other filesystem failure is returned as [`LockError::Io`].
    pub async fn try_acquire(&self, resource: &str) -> Result<LockGuard, LockError> {
        validate_resource(resource)?;
        let path = self.lock_path(resource);

        match create_exclusive(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Lock directory missing; create it and try exactly once more.
                tokio::fs::create_dir_all(&self.dir)
                    .await
                    .map_err(|source| LockError::Io {
                        resource: resource.to_string(),
                        source,
                    })?;
                create_exclusive(&path)
                    .await
                    .map_err(|e| classify(resource, e))?;
            }
            Err(e) => return Err(classify(resource, e)),
        }

        debug!(resource, path = %path.display(), "Lock acquired");
        Ok(LockGuard {
            resource: resource.to_string(),
            path,
            released: false,
        })
    }

    /// Acquire `resource`, sleeping with exponential backoff while it is
    /// contended. Gives up with the last contention error once
    /// `backoff.max_wait` has elapsed. I/O errors are returned immediately.
    pub async fn acquire_with_backoff(
        &self,
        resource: &str,
        backoff: &Backoff,
    ) -> Result<LockGuard, LockError> {
        let deadline = Instant::now() + backoff.max_wait;
        let mut attempt = 0u32;

        loop {
            match self.try_acquire(resource).await {
                Ok(guard) => return Ok(guard),
                Err(e) if e.is_contention() => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(resource, attempts = attempt + 1, "Gave up waiting for lock");
                        return Err(e);
                    }
                    let delay = backoff.delay_for(attempt).min(deadline - now);
                    debug!(resource, attempt, delay_ms = delay.as_millis() as u64, "Lock contended, backing off");
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run `op` while holding the lock for `resource`.
    ///
    /// The lock is released on every exit path: success, error, panic, or the
    /// returned future being dropped. Contention is reported without retrying.
    pub async fn with_lock<T, E, F, Fut>(&self, resource: &str, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let guard = self.try_acquire(resource).await?;
        run_and_release(guard, op).await
    }

    /// Like [`with_lock`](Self::with_lock) but waits for the lock with
    /// `backoff` instead of failing on the first contention.
    pub async fn with_lock_waiting<T, E, F, Fut>(
        &self,
        resource: &str,
        backoff: &Backoff,
        op: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let guard = self.acquire_with_backoff(resource, backoff).await?;
        run_and_release(guard, op).await
    }
}

async fn run_and_release<T, E, F, Fut>(guard: LockGuard, op: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let result = op().await;
    if let Err(e) = guard.release() {
        warn!("Failed to release lock: {e}");
    }
    result
}

/// Proof of holding a named lock. Dropping the guard deletes the lock file.
#[derive(Debug)]
pub struct LockGuard {
    resource: String,
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Name of the locked resource.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock now. A lock file that is already gone counts as
    /// released.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        remove_lock_file(&self.path).map_err(|source| LockError::Io {
            resource: self.resource.clone(),
            source,
        })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match remove_lock_file(&self.path) {
            Ok(()) => debug!(resource = %self.resource, "Lock released on drop"),
            Err(e) => warn!(resource = %self.resource, "Failed to remove lock file: {e}"),
        }
    }
}

async fn create_exclusive(path: &Path) -> std::io::Result<()> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map(|_| ())
}

fn remove_lock_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn classify(resource: &str, e: std::io::Error) -> LockError {
    if e.kind() == ErrorKind::AlreadyExists {
        LockError::Contention {
            resource: resource.to_string(),
        }
    } else {
        LockError::Io {
            resource: resource.to_string(),
            source: e,
        }
    }
}

fn validate_resource(resource: &str) -> Result<(), LockError> {
    let valid = !resource.is_empty()
        && !resource.starts_with('.')
        && !resource.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(LockError::Io {
            resource: resource.to_string(),
            source: std::io::Error::new(ErrorKind::InvalidInput, "invalid lock resource name"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (LockManager, TempDir) {
        let tmp = TempDir::new().expect("tempdir");
        let manager = LockManager::new(tmp.path().join("locks"));
        (manager, tmp)
    }

    #[tokio::test]
    async fn acquire_creates_file_and_drop_removes_it() {
        let (locks, _tmp) = manager();

        let guard = locks.try_acquire("alpha").await.unwrap();
        assert!(guard.path().exists());
        assert!(locks.is_locked("alpha").await);

        drop(guard);
        assert!(!locks.lock_path("alpha").exists());
    }

    #[tokio::test]
    async fn second_acquire_is_contention() {
        let (locks, _tmp) = manager();

        let _held = locks.try_acquire("alpha").await.unwrap();
        let err = locks.try_acquire("alpha").await.unwrap_err();
        assert!(err.is_contention(), "expected contention, got {err:?}");
    }

    #[tokio::test]
    async fn different_names_are_independent() {
        let (locks, _tmp) = manager();

        let _a = locks.try_acquire("alpha").await.unwrap();
        let _b = locks.try_acquire("beta").await.unwrap();
    }

    #[tokio::test]
    async fn release_of_vanished_lock_is_noop() {
        let (locks, _tmp) = manager();

        let guard = locks.try_acquire("alpha").await.unwrap();
        std::fs::remove_file(guard.path()).unwrap();
        guard.release().expect("release of missing file should succeed");
    }

    #[tokio::test]
    async fn with_lock_releases_after_error() {
        let (locks, _tmp) = manager();

        let result: Result<(), LockError> = locks
            .with_lock("alpha", || async {
                Err(LockError::Contention {
                    resource: "inner".into(),
                })
            })
            .await;
        assert!(result.is_err());
        assert!(!locks.is_locked("alpha").await);
    }

    #[tokio::test]
    async fn with_lock_releases_after_panic() {
        let (locks, _tmp) = manager();

        let task_locks = locks.clone();
        let joined = tokio::spawn(async move {
            let _: Result<(), LockError> = task_locks
                .with_lock("alpha", || async {
                    if true {
                        panic!("boom");
                    }
                    Ok(())
                })
                .await;
        })
        .await;

        assert!(joined.is_err(), "task should have panicked");
        assert!(!locks.is_locked("alpha").await);
    }

    #[tokio::test]
    async fn non_contention_io_error_is_not_classified_as_contention() {
        let tmp = TempDir::new().unwrap();
        // Lock "directory" is a regular file, so creating a lock inside fails.
        let bogus = tmp.path().join("not-a-dir");
        std::fs::write(&bogus, "x").unwrap();
        let locks = LockManager::new(&bogus);

        let err = locks.try_acquire("alpha").await.unwrap_err();
        assert!(matches!(err, LockError::Io { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn rejects_path_like_resource_names() {
        let (locks, _tmp) = manager();
        assert!(locks.try_acquire("../escape").await.is_err());
        assert!(locks.try_acquire("").await.is_err());
    }

    #[tokio::test]
    async fn backoff_gives_up_with_contention() {
        let (locks, _tmp) = manager();
        let _held = locks.try_acquire("alpha").await.unwrap();

        let backoff = Backoff {
            initial: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
            max_wait: Duration::from_millis(60),
        };
        let err = locks.acquire_with_backoff("alpha", &backoff).await.unwrap_err();
        assert!(err.is_contention());
    }

    #[test]
    fn backoff_delay_doubles_and_caps() {
        let backoff = Backoff {
            initial: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_wait: Duration::from_secs(1),
        };
        assert_eq!(backoff.delay_for(0), Duration::from_millis(10));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(20));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(40));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(50));
        assert_eq!(backoff.delay_for(40), Duration::from_millis(50));
    }

    #[test]
    fn zero_backoff_still_sleeps() {
        let backoff = Backoff {
            initial: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_wait: Duration::from_millis(20),
        };
        for attempt in [0, 1, 10] {
            assert_eq!(backoff.delay_for(attempt), MIN_RETRY_DELAY);
        }
    }

    #[tokio::test]
    async fn zero_backoff_still_waits_out_the_budget() {
        let (locks, _tmp) = manager();
        let _held = locks.try_acquire("busy").await.unwrap();
        let backoff = Backoff {
            initial: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_wait: Duration::from_millis(30),
        };

        let started = std::time::Instant::now();
        let err = locks.acquire_with_backoff("busy", &backoff).await.unwrap_err();
        assert!(err.is_contention());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
