use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Barrier;

use warden::error::LockError;
use warden::lock::{Backoff, LockManager};

fn patient_backoff() -> Backoff {
    Backoff {
        initial: Duration::from_millis(2),
        max_delay: Duration::from_millis(20),
        max_wait: Duration::from_secs(20),
    }
}

// ============================================================
// Mutual exclusion across tasks
// ============================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_name_critical_sections_never_overlap() {
    let tmp = tempfile::tempdir().unwrap();
    let manager = LockManager::new(tmp.path().join("locks"));
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        let inside = inside.clone();
        let max_inside = max_inside.clone();
        let completed = completed.clone();
        tasks.push(tokio::spawn(async move {
            manager
                .with_lock_waiting("shared", &patient_backoff(), || async {
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(15)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, LockError>(())
                })
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    assert_eq!(completed.load(Ordering::SeqCst), 8);
    assert!(!manager.is_locked("shared").await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_different_names_may_overlap() {
    let tmp = tempfile::tempdir().unwrap();
    let manager = LockManager::new(tmp.path());
    // Both holders must be inside at once to pass the barrier.
    let barrier = Arc::new(Barrier::new(2));

    let mut tasks = Vec::new();
    for name in ["left", "right"] {
        let manager = manager.clone();
        let barrier = barrier.clone();
        tasks.push(tokio::spawn(async move {
            manager
                .with_lock(name, || async {
                    barrier.wait().await;
                    Ok::<_, LockError>(())
                })
                .await
        }));
    }

    let joined = tokio::time::timeout(Duration::from_secs(5), async {
        for task in tasks {
            task.await.unwrap().unwrap();
        }
    })
    .await;
    assert!(joined.is_ok(), "independent locks blocked each other");
}

// ============================================================
// Cross-manager behaviour (same directory, separate handles)
// ============================================================

#[tokio::test]
async fn test_managers_sharing_a_directory_see_each_others_locks() {
    let tmp = tempfile::tempdir().unwrap();
    let first = LockManager::new(tmp.path());
    let second = LockManager::new(tmp.path());

    let guard = first.try_acquire("global").await.unwrap();
    let err = second.try_acquire("global").await.unwrap_err();
    assert!(err.is_contention());
    assert!(second.is_locked("global").await);

    guard.release().unwrap();
    let again = second.try_acquire("global").await.unwrap();
    drop(again);
    assert!(!first.is_locked("global").await);
}

#[tokio::test]
async fn test_waiter_gets_lock_after_holder_releases() {
    let tmp = tempfile::tempdir().unwrap();
    let manager = LockManager::new(tmp.path());
    let guard = manager.try_acquire("slot").await.unwrap();

    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.acquire_with_backoff("slot", &patient_backoff()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    drop(guard);
    let acquired = waiter.await.unwrap().unwrap();
    assert_eq!(acquired.resource(), "slot");
}

#[tokio::test]
async fn test_operation_error_still_releases_lock() {
    let tmp = tempfile::tempdir().unwrap();
    let manager = LockManager::new(tmp.path());

    let result: Result<(), anyhow::Error> = manager
        .with_lock("job", || async { Err(anyhow::anyhow!("operation failed")) })
        .await;
    assert!(result.is_err());
    assert!(!manager.is_locked("job").await);
}
