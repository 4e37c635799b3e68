//! Append-only trajectory history with write-through JSON persistence.
//!
//! Every append rewrites the whole file through a temp file, fsync, rename
//! and a directory fsync, while holding the write lock. The in-memory list
//! is only replaced once the write is durable. A snapshot therefore never
//! sees a half-applied append or an entry that is not on disk, and the file
//! is always either the previous or the new complete history.
//!
//! The write runs on its own task that owns the lock guard, so dropping an
//! `append` future mid-write cannot leave memory and disk out of step.
//!
//! Rewriting the full file on each append is fine for a single tracked
//! device. An append-only line log would keep the same interface.

use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::Utc;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt, sync::RwLock, task::JoinError};
use tracing::{debug, info, warn};

use crate::PositionEstimate;

// ---

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Failed to serialize history: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to persist history to '{path}': {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("History writer task failed: {0}")]
    Task(#[from] JoinError),
}

/// Shared, durable trajectory.
#[derive(Debug)]
pub struct HistoryLog {
    path: PathBuf,
    entries: Arc<RwLock<Vec<PositionEstimate>>>,
}

impl HistoryLog {
    /// Load history from `path`.
    ///
    /// A missing, unreadable or malformed file starts an empty history. An
    /// unreadable or malformed file is first moved aside to
    /// `<name>.corrupt-<unix secs>` so the next append cannot replace it.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        // ---
        let path = path.into();
        let entries = load_entries(&path).await;
        info!(
            "History loaded from '{}': {} points",
            path.display(),
            entries.len()
        );

        Self {
            path,
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Append one estimate and persist before returning.
    ///
    /// Memory is only updated after the new list is durable, so it never
    /// holds anything that is not on disk. Returns the new length.
    pub async fn append(&self, estimate: PositionEstimate) -> Result<usize, HistoryError> {
        // ---
        let mut entries = self.entries.clone().write_owned().await;
        let path = self.path.clone();

        let writer = tokio::spawn(async move {
            let next: Vec<PositionEstimate> = entries
                .iter()
                .cloned()
                .chain(std::iter::once(estimate))
                .collect();

            persist(&path, &next).await?;
            *entries = next;

            debug!("History persisted: {} points", entries.len());
            Ok::<_, HistoryError>(entries.len())
        });

        writer.await?
    }

    /// Copy of the full history as of this call.
    pub async fn snapshot(&self) -> Vec<PositionEstimate> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ---

async fn load_entries(path: &Path) -> Vec<PositionEstimate> {
    // ---
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("No history at '{}', starting empty", path.display());
            return Vec::new();
        }
        Err(e) => {
            warn!(
                "Cannot read history '{}': {}. Starting empty.",
                path.display(),
                e
            );
            move_aside(path).await;
            return Vec::new();
        }
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Vec::new();
    }

    match serde_json::from_slice(&bytes) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                "History '{}' is malformed: {}. Starting empty.",
                path.display(),
                e
            );
            move_aside(path).await;
            Vec::new()
        }
    }
}

/// Rename a history file that could not be loaded out of the way.
async fn move_aside(path: &Path) {
    // ---
    let aside = quarantine_path(path).await;
    match fs::rename(path, &aside).await {
        Ok(()) => warn!("Previous history kept at '{}'", aside.display()),
        Err(e) => warn!(
            "Could not move '{}' aside: {}. The next append will replace it.",
            path.display(),
            e
        ),
    }
}

/// `<name>.corrupt-<unix secs>`, with a counter if that name is taken.
async fn quarantine_path(path: &Path) -> PathBuf {
    // ---
    let base = format!(".corrupt-{}", Utc::now().timestamp());
    let mut candidate = sibling(path, &base);
    let mut n = 1;
    while fs::try_exists(&candidate).await.unwrap_or(false) {
        candidate = sibling(path, &format!("{}-{}", base, n));
        n += 1;
    }
    candidate
}

async fn persist(path: &Path, entries: &[PositionEstimate]) -> Result<(), HistoryError> {
    // ---
    let json = serde_json::to_vec(entries)?;
    let temp_path = sibling(path, ".tmp");
    let write_err = |source| HistoryError::Write {
        path: path.to_path_buf(),
        source,
    };

    let parent = parent_dir(path);
    fs::create_dir_all(parent).await.map_err(write_err)?;

    let result: io::Result<()> = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&json).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path).await;
        return Err(write_err(e));
    }

    // The rename is only durable once the directory entry is
    sync_dir(parent).await.map_err(write_err)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// `history.json` -> `history.json<suffix>` in the same directory.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}
