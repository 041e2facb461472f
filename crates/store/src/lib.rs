//! Checkpoint store for relay tasks
//!
//! Durable, keyed-by-task-id persistence of the full resumable state. One
//! JSON record per task. Snapshots written by older builds stay loadable
//! (new fields default) and a snapshot that fails structural validation is
//! surfaced as corruption, never silently repaired.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

pub mod snapshot;

pub use snapshot::{
    CheckpointSnapshot, ErrorEvent, ErrorKind, FileEntry, HistoryItem, IterationOutcome,
    IterationRecord, PermissionTier, RecoveryAction, RecoveryContext, Summary, Task, TaskStatus,
    TodoItem, TodoStatus, ToolExchange, ToolResult, SNAPSHOT_VERSION,
};

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no checkpoint for task {0}")]
    NotFound(String),

    #[error("state corruption in task {task_id}: {detail}")]
    Corrupt { task_id: String, detail: String },

    #[error("task {0} is already owned by another orchestrator")]
    AlreadyOwned(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Write ownership of a task id. Released when dropped.
///
/// Only one orchestrator instance may hold write ownership of a task at a
/// time; a second concurrent `run`/`resume` is rejected rather than allowed
/// to produce divergent snapshots.
pub struct OwnershipGuard {
    task_id: String,
    owned: Arc<Mutex<HashSet<String>>>,
}

impl OwnershipGuard {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl Drop for OwnershipGuard {
    fn drop(&mut self) {
        if let Ok(mut owned) = self.owned.lock() {
            owned.remove(&self.task_id);
        }
    }
}

/// Keyed checkpoint persistence rooted at a directory
#[derive(Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    owned: Arc<Mutex<HashSet<String>>>,
}

impl CheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).ok();

        Self {
            dir,
            owned: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Claim write ownership of a task id
    pub fn acquire(&self, task_id: &str) -> Result<OwnershipGuard> {
        let mut owned = self.owned.lock().expect("ownership set poisoned");
        if !owned.insert(task_id.to_string()) {
            return Err(StoreError::AlreadyOwned(task_id.to_string()));
        }
        debug!("acquired write ownership of {}", task_id);
        Ok(OwnershipGuard {
            task_id: task_id.to_string(),
            owned: Arc::clone(&self.owned),
        })
    }

    /// Persist a snapshot. Validates before writing.
    pub async fn save(&self, snapshot: &CheckpointSnapshot) -> Result<()> {
        snapshot.validate().map_err(|detail| StoreError::Corrupt {
            task_id: snapshot.task.task_id.clone(),
            detail,
        })?;

        let path = self.snapshot_path(&snapshot.task.task_id);
        let content = serde_json::to_string_pretty(snapshot).map_err(|e| StoreError::Corrupt {
            task_id: snapshot.task.task_id.clone(),
            detail: e.to_string(),
        })?;

        // Write to a sibling temp file first so a crash mid-write never
        // clobbers the previous good checkpoint.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("saved checkpoint for {}", snapshot.task.task_id);
        Ok(())
    }

    /// Load and validate the snapshot for a task id
    pub async fn load(&self, task_id: &str) -> Result<CheckpointSnapshot> {
        let path = self.snapshot_path(task_id);
        if !path.exists() {
            return Err(StoreError::NotFound(task_id.to_string()));
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let snapshot: CheckpointSnapshot =
            serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
                task_id: task_id.to_string(),
                detail: e.to_string(),
            })?;

        snapshot.validate().map_err(|detail| {
            warn!("checkpoint for {} failed validation: {}", task_id, detail);
            StoreError::Corrupt {
                task_id: task_id.to_string(),
                detail,
            }
        })?;

        debug!("loaded checkpoint for {}", task_id);
        Ok(snapshot)
    }

    /// Discard a task's checkpoint
    pub async fn delete(&self, task_id: &str) -> Result<bool> {
        let path = self.snapshot_path(task_id);
        if path.exists() {
            tokio::fs::remove_file(path).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// All task ids with a stored checkpoint
    pub async fn list(&self) -> Vec<String> {
        let mut ids = Vec::new();

        if let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if let Some(name) = entry.file_name().to_str() {
                    if let Some(stripped) = name.strip_suffix(".json") {
                        ids.push(stripped.to_string());
                    }
                }
            }
        }

        ids.sort();
        ids
    }

    fn snapshot_path(&self, task_id: &str) -> PathBuf {
        let safe_id = task_id.replace([':', '/', '\\'], "_");
        self.dir.join(format!("{}.json", safe_id))
    }
}
