//! Durable whole-document store with atomic replace and crash recovery.
//!
//! Every mutation goes through [`DocumentStore::transact`]: take the
//! sentinel lock, read the full document, apply one change, write the full
//! document to a temp file in the same directory, rename it over the data
//! file, release. Readers never see a half-written document because the
//! rename is atomic, and a crash mid-write leaves the previous document
//! intact plus at most a leftover owner record in the lock sentinel.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, debug_span, warn, Instrument};
use uuid::Uuid;

use crate::config::DashboardConfig;
use crate::lock::{FileLock, LockSettings};
use crate::models::document::StoreDocument;
use crate::{AppError, Result};

/// Outcome of reading the data file from disk.
enum Loaded {
    Document(StoreDocument),
    Missing,
    Corrupt(String),
}

/// Handle to one persisted [`StoreDocument`] and its lock.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    path: PathBuf,
    lock: FileLock,
    settings: LockSettings,
}

impl DocumentStore {
    /// Open a store at `path`. Nothing is touched on disk until first use.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>, settings: LockSettings) -> Self {
        let path = path.into();
        let lock = FileLock::new(lock_path_for(&path), settings.stale_after);
        Self {
            path,
            lock,
            settings,
        }
    }

    /// Open the store described by the dashboard configuration.
    #[must_use]
    pub fn from_config(config: &DashboardConfig) -> Self {
        Self::open(
            config.sessions_path(),
            LockSettings {
                timeout: config.lock_timeout(),
                stale_after: config.stale_lock_after(),
            },
        )
    }

    /// Path of the data file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the lock sentinel.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    /// Read a complete snapshot without taking the lock.
    ///
    /// A missing file reads as an empty document. If the file is
    /// unparseable, the lock is taken, the file is re-checked, and a
    /// still-corrupt file is quarantined before an empty document is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on read failure, or `AppError::LockTimeout`
    /// if quarantining a corrupt file cannot obtain the lock.
    pub async fn read(&self) -> Result<StoreDocument> {
        match self.load().await? {
            Loaded::Document(doc) => Ok(doc),
            Loaded::Missing => Ok(StoreDocument::default()),
            Loaded::Corrupt(_) => {
                let _guard = self.lock.acquire(self.settings.timeout).await?;
                self.load_or_recover().await
            }
        }
    }

    /// Replace the whole document under the lock.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LockTimeout` if the lock cannot be taken, or
    /// `AppError::Io`/`AppError::Store` if the write fails.
    pub async fn write(&self, document: StoreDocument) -> Result<()> {
        self.transact(move |doc| {
            *doc = document;
            Ok(())
        })
        .await
    }

    /// Linearizable read-modify-write across all processes sharing the path.
    ///
    /// `apply` runs against the current document while the lock is held.
    /// If it returns `Err`, nothing is written. The lock is released on every
    /// exit path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LockTimeout` if the lock is not acquired within
    /// budget, the error produced by `apply`, or `AppError::Io`/
    /// `AppError::Store` if persisting fails.
    pub async fn transact<T, F>(&self, apply: F) -> Result<T>
    where
        F: FnOnce(&mut StoreDocument) -> Result<T>,
    {
        let span = debug_span!("transact", path = %self.path.display());
        async move {
            let guard = self.lock.acquire(self.settings.timeout).await?;
            let mut doc = self.load_or_recover().await?;
            let output = apply(&mut doc)?;
            self.persist(&doc).await?;
            guard.release();
            debug!(
                sessions = doc.sessions.len(),
                messages = doc.messages.len(),
                "transaction committed"
            );
            Ok(output)
        }
        .instrument(span)
        .await
    }

    async fn load(&self) -> Result<Loaded> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Loaded::Missing),
            Err(err) => {
                return Err(AppError::Io(format!(
                    "failed to read {}: {err}",
                    self.path.display()
                )))
            }
        };

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Loaded::Missing);
        }

        match serde_json::from_slice::<StoreDocument>(&raw) {
            Ok(doc) => Ok(Loaded::Document(doc)),
            Err(err) => Ok(Loaded::Corrupt(err.to_string())),
        }
    }

    /// Load the document, quarantining it if corrupt. Caller holds the lock.
    async fn load_or_recover(&self) -> Result<StoreDocument> {
        match self.load().await? {
            Loaded::Document(doc) => Ok(doc),
            Loaded::Missing => Ok(StoreDocument::default()),
            Loaded::Corrupt(reason) => {
                let quarantined = self.quarantine().await?;
                warn!(
                    path = %self.path.display(),
                    quarantined = %quarantined.display(),
                    %reason,
                    "session document was unreadable; quarantined and reinitialized"
                );
                Ok(StoreDocument::default())
            }
        }
    }

    async fn quarantine(&self) -> Result<PathBuf> {
        let target = sibling_with_suffix(
            &self.path,
            &format!(
                "corrupt-{}-{}",
                Utc::now().format("%Y%m%dT%H%M%SZ"),
                short_id()
            ),
        );
        tokio::fs::rename(&self.path, &target).await.map_err(|err| {
            AppError::Io(format!(
                "failed to quarantine {}: {err}",
                self.path.display()
            ))
        })?;
        Ok(target)
    }

    /// Write the document via temp file + rename. Caller holds the lock.
    async fn persist(&self, doc: &StoreDocument) -> Result<()> {
        let body = serde_json::to_vec_pretty(doc)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &body))
            .await
            .map_err(|err| AppError::Store(format!("persist task failed: {err}")))?
    }
}

/// Write `body` to a temp file beside `path`, fsync it, and rename it into
/// place. The temp file is removed on every failure path.
fn write_atomically(path: &Path, body: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name_of(path)))
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|err| AppError::Io(format!("failed to create temporary file: {err}")))?;

    tmp.write_all(body)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|err| AppError::Io(format!("failed to write temporary file: {err}")))?;

    tmp.persist(path).map_err(|err| {
        AppError::Io(format!("failed to persist {}: {}", path.display(), err.error))
    })?;
    Ok(())
}

/// Sentinel path for a data file: `sessions.json` → `sessions.json.lock`.
#[must_use]
pub fn lock_path_for(data_path: &Path) -> PathBuf {
    sibling_with_suffix(data_path, "lock")
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    path.with_file_name(format!("{}.{suffix}", file_name_of(path)))
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| "sessions.json".into(), |n| n.to_string_lossy().into_owned())
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_owned()
}
