//! Sentinel lock acquisition, timeout, and stale-holder recovery.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use fs2::FileExt;

use agent_dashboard::lock::{pid_alive, FileLock, LockOwner};
use agent_dashboard::AppError;

fn sentinel(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("sessions.json.lock")
}

fn write_owner(path: &Path, owner: &LockOwner) {
    std::fs::write(path, serde_json::to_vec(owner).expect("owner json")).expect("write sentinel");
}

fn read_owner(path: &Path) -> LockOwner {
    let raw = std::fs::read(path).expect("read sentinel");
    serde_json::from_slice(&raw).expect("owner json")
}

/// Hold the OS lock on `path` with `body` as its record, like a holder that
/// is still running.
fn hold(path: &Path, body: &[u8]) -> File {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .expect("open sentinel");
    FileExt::lock_exclusive(&file).expect("hold lock");
    file.write_all(body).expect("write record");
    file
}

fn owner(pid: u32, token: &str, age: chrono::Duration) -> LockOwner {
    LockOwner {
        pid,
        token: token.into(),
        acquired_at: Utc::now() - age,
    }
}

/// PID of a child that has already exited and been reaped.
fn dead_pid() -> u32 {
    let mut child = std::process::Command::new("true")
        .spawn()
        .expect("spawn short-lived child");
    let pid = child.id();
    child.wait().expect("reap child");
    pid
}

// ─── acquisition ─────────────────────────────────────────

#[tokio::test]
async fn acquire_on_free_path_creates_sentinel() {
    let dir = tempfile::tempdir().expect("tempdir");
    let lock = FileLock::new(sentinel(&dir), Duration::from_secs(60));

    let guard = lock.acquire(Duration::from_secs(1)).await.expect("acquire");
    assert!(lock.path().exists());
    assert_eq!(read_owner(lock.path()).token, guard.token());

    guard.release();
    assert!(
        std::fs::read(lock.path()).expect("read").is_empty(),
        "release must clear the owner record"
    );
    assert!(lock.try_acquire().expect("try").is_some());
}

#[tokio::test]
async fn acquire_creates_missing_parent_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("deeper").join("sessions.json.lock");
    let lock = FileLock::new(path, Duration::from_secs(60));

    let guard = lock.acquire(Duration::from_secs(1)).await.expect("acquire");
    assert!(lock.path().exists());
    drop(guard);
}

#[tokio::test]
async fn live_fresh_holder_causes_timeout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = sentinel(&dir);
    let holder = FileLock::new(path.clone(), Duration::from_secs(60))
        .try_acquire()
        .expect("try")
        .expect("hold");
    let lock = FileLock::new(path.clone(), Duration::from_secs(60));

    let started = Instant::now();
    let err = lock
        .acquire(Duration::from_millis(200))
        .await
        .expect_err("lock is held by a live owner");

    assert!(matches!(err, AppError::LockTimeout(_)), "got {err}");
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(
        read_owner(&path).token,
        holder.token(),
        "a live holder's record must be left alone"
    );
}

#[tokio::test]
async fn waiter_proceeds_after_holder_releases() {
    let dir = tempfile::tempdir().expect("tempdir");
    let lock = FileLock::new(sentinel(&dir), Duration::from_secs(60));

    let guard = lock.acquire(Duration::from_secs(1)).await.expect("first");
    let releaser = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(guard);
    });

    let started = Instant::now();
    let second = lock.acquire(Duration::from_secs(5)).await.expect("second");
    assert!(started.elapsed() >= Duration::from_millis(90));
    releaser.await.expect("releaser task");
    drop(second);
}

// ─── stale holders ───────────────────────────────────────

#[tokio::test]
async fn crashed_owner_record_does_not_block() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = sentinel(&dir);
    let pid = dead_pid();
    assert!(!pid_alive(pid), "reaped child should not be alive");
    write_owner(&path, &owner(pid, "crashed", chrono::Duration::zero()));
    let lock = FileLock::new(path.clone(), Duration::from_secs(60));
    let timeout = Duration::from_secs(2);

    let started = Instant::now();
    let guard = lock
        .acquire(timeout)
        .await
        .expect("dead holder should be reclaimed");

    assert!(started.elapsed() < timeout / 2, "took {:?}", started.elapsed());
    let recorded = read_owner(&path);
    assert_eq!(recorded.token, guard.token());
    assert_eq!(recorded.pid, std::process::id());
}

#[tokio::test]
async fn held_lock_with_dead_owner_is_broken() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = sentinel(&dir);
    let record = owner(dead_pid(), "orphaned", chrono::Duration::zero());
    let _orphan = hold(&path, &serde_json::to_vec(&record).expect("json"));
    let lock = FileLock::new(path.clone(), Duration::from_secs(60));
    let timeout = Duration::from_secs(2);

    let started = Instant::now();
    let guard = lock.acquire(timeout).await.expect("dead owner is reclaimed");

    assert!(started.elapsed() < timeout / 2, "took {:?}", started.elapsed());
    assert_eq!(read_owner(&path).token, guard.token());
}

#[tokio::test]
async fn old_holder_is_broken_even_if_pid_is_alive() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = sentinel(&dir);
    let record = owner(std::process::id(), "hung", chrono::Duration::hours(2));
    let _hung = hold(&path, &serde_json::to_vec(&record).expect("json"));
    let lock = FileLock::new(path, Duration::from_secs(60));
    let timeout = Duration::from_secs(2);

    let started = Instant::now();
    let guard = lock
        .acquire(timeout)
        .await
        .expect("aged holder should be reclaimed");

    assert!(started.elapsed() < timeout / 2, "took {:?}", started.elapsed());
    assert_ne!(guard.token(), "hung");
}

#[tokio::test]
async fn held_lock_without_record_is_never_broken() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = sentinel(&dir);
    let _settling = hold(&path, b"");

    let eager = FileLock::new(path, Duration::from_millis(1));
    let err = eager
        .acquire(Duration::from_millis(150))
        .await
        .expect_err("a holder still writing its record is respected");
    assert!(err.is_lock_timeout());
}

#[tokio::test]
async fn garbled_record_without_holder_is_free() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = sentinel(&dir);
    std::fs::write(&path, b"{\"pid\": 12").expect("write torn record");

    let lock = FileLock::new(path, Duration::from_secs(60));
    let guard = lock.try_acquire().expect("try");
    assert!(guard.is_some(), "nobody holds the OS lock");
}

#[tokio::test]
async fn broken_holder_release_leaves_new_owner_alone() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = sentinel(&dir);
    let slow = FileLock::new(path.clone(), Duration::from_secs(60));
    let impatient = FileLock::new(path.clone(), Duration::from_millis(50));

    let first = slow.try_acquire().expect("try").expect("first holder");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = impatient
        .acquire(Duration::from_secs(2))
        .await
        .expect("first holder is past the threshold");

    drop(first);

    assert_eq!(read_owner(&path).token, second.token());
    assert!(
        slow.try_acquire().expect("try").is_none(),
        "the new owner still holds the lock"
    );
}

#[tokio::test]
async fn reclaim_leaves_only_lock_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = sentinel(&dir);
    let record = owner(std::process::id(), "hung", chrono::Duration::hours(1));
    let hung = hold(&path, &serde_json::to_vec(&record).expect("json"));
    let lock = FileLock::new(path, Duration::from_secs(60));

    let guard = lock.acquire(Duration::from_secs(2)).await.expect("acquire");
    drop(guard);
    drop(hung);

    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .expect("read_dir")
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, ["sessions.json.lock", "sessions.json.lock.reclaim"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn waiters_racing_to_reclaim_never_overlap() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = sentinel(&dir);
    let record = owner(dead_pid(), "orphaned", chrono::Duration::zero());
    let _orphan = hold(&path, &serde_json::to_vec(&record).expect("json"));

    let inside = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let lock = FileLock::new(path.clone(), Duration::from_secs(60));
        let inside = Arc::clone(&inside);
        let overlaps = Arc::clone(&overlaps);
        tasks.push(tokio::spawn(async move {
            for _ in 0..20 {
                let guard = lock.acquire(Duration::from_secs(10)).await.expect("acquire");
                if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                tokio::task::yield_now().await;
                inside.fetch_sub(1, Ordering::SeqCst);
                drop(guard);
            }
        }));
    }
    for task in tasks {
        task.await.expect("task");
    }

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}
