//! Durable, crash-safe storage of the session ledger.
//!
//! The cache is a single JSON file. Reads are permissive (a missing or
//! unparsable file yields an empty ledger, and an unparsable file is left in
//! place). Writes stage the full document in a temp file next to the target
//! and rename it over the real path, so an interrupted save never damages the
//! previous cache. Records the remote store has already accepted are left out
//! of every write; they only live on in memory.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info, warn};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::Ledger;

pub const CACHE_FILE_NAME: &str = "activity-sessions.json";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("cache I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl CacheError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Clone)]
pub struct DurableCache {
    path: Arc<PathBuf>,
    /// Serializes writers so two renames never interleave.
    write_lock: Arc<Mutex<()>>,
}

impl DurableCache {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path: Arc::new(path),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CACHE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Never fails: storage problems are logged and yield an empty ledger.
    pub async fn load(&self) -> Ledger {
        let path = self.path.clone();
        match tokio::task::spawn_blocking(move || read_ledger(&path)).await {
            Ok(ledger) => ledger,
            Err(err) => {
                warn!("Cache load worker failed ({err}); starting with an empty ledger");
                Ledger::default()
            }
        }
    }

    /// Persists the ledger if it carries unsynced changes. Returns whether a
    /// write happened.
    pub async fn save(&self, ledger: &Ledger) -> Result<bool, CacheError> {
        if !ledger.unsynced_changes {
            debug!("Cache save skipped: no unsynced changes");
            return Ok(false);
        }
        self.write(ledger).await?;
        Ok(true)
    }

    /// Unconditional write, used after a sync to drop the records it drained.
    pub async fn rewrite(&self, ledger: &Ledger) -> Result<(), CacheError> {
        self.write(ledger).await
    }

    async fn write(&self, ledger: &Ledger) -> Result<(), CacheError> {
        let on_disk = ledger.retain_unsynced();
        let content = serde_json::to_vec_pretty(&on_disk)?;
        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &content)).await??;
        debug!(
            "Cache written to {} ({} sessions)",
            self.path.display(),
            on_disk.sessions.len()
        );
        Ok(())
    }
}

fn read_ledger(path: &Path) -> Ledger {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!("No session cache at {}; starting fresh", path.display());
            return Ledger::default();
        }
        Err(err) => {
            warn!(
                "Failed to read session cache {} ({err}); starting with an empty ledger",
                path.display()
            );
            return Ledger::default();
        }
    };

    if content.trim().is_empty() {
        warn!("Empty session cache at {}; starting with an empty ledger", path.display());
        return Ledger::default();
    }

    match serde_json::from_str::<Ledger>(&content) {
        Ok(ledger) => {
            info!(
                "Loaded {} sessions from {} (unsynced: {})",
                ledger.sessions.len(),
                path.display(),
                ledger.unsynced_changes
            );
            ledger
        }
        Err(err) => {
            // The unreadable file stays where it is for inspection.
            warn!(
                "Failed to parse session cache {} ({err}); starting with an empty ledger",
                path.display()
            );
            Ledger::default()
        }
    }
}

/// Writes the full document into a temp file beside `path`.
fn stage(path: &Path, content: &[u8]) -> Result<NamedTempFile, CacheError> {
    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent_dir).map_err(|err| CacheError::io(parent_dir, err))?;

    let mut temp_file =
        NamedTempFile::new_in(parent_dir).map_err(|err| CacheError::io(parent_dir, err))?;
    temp_file
        .write_all(content)
        .map_err(|err| CacheError::io(temp_file.path(), err))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|err| CacheError::io(temp_file.path(), err))?;
    Ok(temp_file)
}

fn commit(temp_file: NamedTempFile, path: &Path) -> Result<(), CacheError> {
    temp_file
        .persist(path)
        .map_err(|err| CacheError::io(path, err.error))?;
    Ok(())
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<(), CacheError> {
    let staged = stage(path, content)?;
    commit(staged, path)
}
