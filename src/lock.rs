//! Cross-process advisory lock backed by a sentinel file.
//!
//! The sentinel lives next to the data file (`sessions.json` →
//! `sessions.json.lock`) and carries an OS advisory lock taken through
//! `fs2`. The kernel drops that lock when the holder exits, so a hook that
//! is killed mid-transaction never wedges the store. While the lock is
//! held, the sentinel body records the owner PID, a random token, and the
//! acquisition time. A holder that is gone, or that keeps the lock past the
//! liveness threshold, has its sentinel unlinked so waiters start over on a
//! fresh file.
//!
//! Unlinking is serialized through a second file, `<sentinel>.reclaim`.
//! Acquirers hold it shared from opening the sentinel until their owner
//! record is written; a reclaimer holds it exclusively while it re-checks
//! the owner and unlinks. A reclaimer therefore never removes a sentinel
//! that a fresh acquirer is still settling into.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{AppError, Result};

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(200);

/// Timing policy for lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    /// Longest a caller waits before giving up with `LockTimeout`.
    pub timeout: Duration,
    /// Lock age at which the holder is presumed hung.
    pub stale_after: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            stale_after: Duration::from_secs(60),
        }
    }
}

/// Owner record written into the sentinel file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockOwner {
    /// Process that holds the lock.
    pub pid: u32,
    /// Per-acquisition token; distinguishes successive holders with one PID.
    pub token: String,
    /// When the lock was taken.
    pub acquired_at: DateTime<Utc>,
}

impl LockOwner {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            token: Uuid::new_v4().to_string(),
            acquired_at: Utc::now(),
        }
    }

    fn age(&self) -> Duration {
        (Utc::now() - self.acquired_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// What a waiter found in the sentinel file.
enum Holder {
    /// No sentinel present.
    Absent,
    /// Sentinel with a readable owner record.
    Owner(LockOwner),
    /// Empty or garbled body: released, or a holder still writing its record.
    Unrecorded,
}

/// Exclusive lock tied to a sentinel path.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
    gate: PathBuf,
    stale_after: Duration,
}

impl FileLock {
    /// Create a lock handle for `path` (the sentinel, not the data file).
    #[must_use]
    pub fn new(path: PathBuf, stale_after: Duration) -> Self {
        let gate = sibling(&path, "reclaim");
        Self {
            path,
            gate,
            stale_after,
        }
    }

    /// Sentinel path guarded by this lock.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock, retrying with bounded exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LockTimeout` if the lock is still held by a live
    /// owner when `timeout` elapses, or `AppError::Io` if the sentinel
    /// cannot be opened or inspected.
    pub async fn acquire(&self, timeout: Duration) -> Result<LockGuard> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut backoff = INITIAL_BACKOFF;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            if let Some(guard) = self.try_acquire()? {
                if attempts > 1 {
                    debug!(
                        path = %self.path.display(),
                        attempts,
                        waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                        "store lock acquired after contention"
                    );
                }
                return Ok(guard);
            }

            if self.reclaim_if_stale()? && Instant::now() < deadline {
                continue;
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(AppError::LockTimeout(format!(
                    "{} still held after {}ms ({attempts} attempts)",
                    self.path.display(),
                    timeout.as_millis()
                )));
            }

            tokio::time::sleep(backoff.min(deadline - now)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Single non-blocking acquisition attempt.
    ///
    /// Returns `Ok(None)` when another holder owns the sentinel.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the sentinel cannot be opened or written.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let gate = open_rw(&self.gate)?;
        if !won(FileExt::try_lock_shared(&gate))? {
            return Ok(None);
        }

        let mut file = open_rw(&self.path)?;
        if !won(FileExt::try_lock_exclusive(&file))? {
            return Ok(None);
        }
        // A reclaimer may have unlinked the path between our open and lock.
        if !still_linked(&file, &self.path)? {
            return Ok(None);
        }

        if let Some(previous) = read_owner(&mut file) {
            warn!(
                path = %self.path.display(),
                owner_pid = previous.pid,
                owner_alive = pid_alive(previous.pid),
                age_secs = previous.age().as_secs(),
                "took over store lock from a holder that never released it"
            );
        }

        let owner = LockOwner::current();
        let body = serde_json::to_vec(&owner)?;
        file.set_len(0)
            .and_then(|()| file.seek(SeekFrom::Start(0)).map(drop))
            .and_then(|()| file.write_all(&body))
            .and_then(|()| file.sync_data())
            .map_err(|err| {
                AppError::Io(format!(
                    "failed to record lock owner in {}: {err}",
                    self.path.display()
                ))
            })?;
        drop(gate);

        Ok(Some(LockGuard {
            file,
            path: self.path.clone(),
            token: owner.token,
            released: false,
        }))
    }

    /// Read the recorded holder, if any.
    fn inspect(path: &Path) -> Result<Holder> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Holder::Absent),
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice::<LockOwner>(&raw).map_or(Holder::Unrecorded, Holder::Owner))
    }

    fn is_stale(&self, owner: &LockOwner) -> bool {
        !pid_alive(owner.pid) || owner.age() >= self.stale_after
    }

    /// Unlink the sentinel if its recorded holder is gone or hung. Returns
    /// `true` when the caller should retry immediately.
    fn reclaim_if_stale(&self) -> Result<bool> {
        let observed = match Self::inspect(&self.path)? {
            Holder::Absent => return Ok(true),
            Holder::Unrecorded => return Ok(false),
            Holder::Owner(owner) if self.is_stale(&owner) => owner,
            Holder::Owner(_) => return Ok(false),
        };

        let gate = open_rw(&self.gate)?;
        if !won(FileExt::try_lock_exclusive(&gate))? {
            return Ok(false);
        }

        // Under the gate no acquirer is mid-record, so an unchanged token
        // means the stale holder still owns the sentinel.
        let unchanged = matches!(
            Self::inspect(&self.path)?,
            Holder::Owner(current) if current.token == observed.token
        );
        if !unchanged {
            return Ok(true);
        }

        let sentinel = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(err.into()),
        };
        if won(FileExt::try_lock_exclusive(&sentinel))? {
            // Nobody holds it any more; the record is a leftover.
            return Ok(true);
        }

        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        warn!(
            path = %self.path.display(),
            owner_pid = observed.pid,
            owner_alive = pid_alive(observed.pid),
            age_secs = observed.age().as_secs(),
            "broke stale store lock"
        );
        drop(gate);
        Ok(true)
    }
}

/// Scoped ownership of a [`FileLock`]. Releases on drop.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
    token: String,
    released: bool,
}

impl LockGuard {
    /// Token identifying this acquisition in the sentinel.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Release the lock now instead of at drop.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match still_linked(&self.file, &self.path) {
            Ok(true) => {}
            Ok(false) => {
                warn!(path = %self.path.display(), "store lock was broken by another process before release");
            }
            Err(err) => {
                warn!(path = %self.path.display(), %err, "failed to inspect lock sentinel on release");
            }
        }

        // An empty sentinel means a clean release.
        if let Err(err) = self.file.set_len(0) {
            warn!(path = %self.path.display(), %err, "failed to clear lock owner record");
        }
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), %err, "failed to unlock store lock");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "lock".into(), |n| n.to_string_lossy().into_owned());
    path.with_file_name(format!("{name}.{suffix}"))
}

fn open_rw(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|err| AppError::Io(format!("failed to open {}: {err}", path.display())))
}

/// `Ok(true)` if the lock was taken, `Ok(false)` if someone else holds it.
fn won(attempt: io::Result<()>) -> Result<bool> {
    match attempt {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == fs2::lock_contended_error().kind() => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn read_owner(file: &mut File) -> Option<LockOwner> {
    let mut raw = Vec::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_end(&mut raw).ok()?;
    serde_json::from_slice(&raw).ok()
}

/// Whether `path` still names the file behind `file`.
#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Whether `path` still names the file behind `file`.
///
/// Open files cannot be unlinked here, so presence is enough.
#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> Result<bool> {
    Ok(path.exists())
}

/// Check whether a process with the given PID exists.
#[cfg(unix)]
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // PID 0 and negatives address process groups, not a single owner.
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    // EPERM still means the process exists; only ESRCH proves it is gone.
    !matches!(kill(Pid::from_raw(raw), None), Err(Errno::ESRCH))
}

/// Check whether a process with the given PID exists.
///
/// Without a portable liveness check, only the age threshold reclaims locks here.
#[cfg(not(unix))]
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    pid != 0
}
