//! File Synchronization Layer: persists client edits into the user's
//! workspace directory.
//!
//! Writes go to a temporary sibling that is renamed over the target, so a
//! run started right after an edit sees either the old or the new file,
//! never a torn one. Concurrent edits of one file by two sessions of the
//! same user are not ordered: last rename wins.

use crate::error::{Result, WorkspaceError};
use crate::metrics;
use crate::registry::Session;
use crate::workspace::{create_dir_inside, ensure_inside, normalize_relative, write_new_file, WorkspaceStore};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Acknowledgment of a persisted edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FileSync {
    store: WorkspaceStore,
}

impl FileSync {
    pub fn new(store: WorkspaceStore) -> Self {
        Self { store }
    }

    pub async fn write_file(&self, session: &Session, relative: &str, content: &str) -> Result<Ack> {
        self.write_recorded(&session.user_id, &session.workspace_dir, relative, content)
            .await
    }

    /// Same as `write_file` for callers without a session (the file tree API)
    pub async fn write_user_file(&self, user_id: &str, relative: &str, content: &str) -> Result<Ack> {
        let workspace_dir = self.store.ensure_user_dir(user_id).await?;
        self.write_recorded(user_id, &workspace_dir, relative, content)
            .await
    }

    async fn write_recorded(
        &self,
        user_id: &str,
        workspace_dir: &Path,
        relative: &str,
        content: &str,
    ) -> Result<Ack> {
        let result = self.write_inner(user_id, workspace_dir, relative, content).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::FILE_WRITES.with_label_values(&[outcome]).inc();
        result
    }

    async fn write_inner(
        &self,
        user_id: &str,
        workspace_dir: &Path,
        relative: &str,
        content: &str,
    ) -> Result<Ack> {
        // validated before touching the filesystem
        let target = self.store.resolve(user_id, relative)?;
        let relative = normalize_relative(relative)?;

        let parent_rel = relative.parent().unwrap_or_else(|| Path::new(""));
        let parent = create_dir_inside(workspace_dir, parent_rel).await?;

        let file_name = target
            .file_name()
            .ok_or_else(|| WorkspaceError::InvalidPath(relative.display().to_string()))?
            .to_string_lossy()
            .into_owned();
        let staging = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        if let Err(e) = write_new_file(&staging, content).await {
            let _ = tokio::fs::remove_file(&staging).await;
            warn!(user_id = %user_id, path = %relative.display(), error = %e, "Write failed");
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            warn!(user_id = %user_id, path = %relative.display(), error = %e, "Rename failed");
            return Err(e.into());
        }

        debug!(
            user_id = %user_id,
            path = %relative.display(),
            bytes = content.len(),
            "File saved"
        );
        Ok(Ack { path: target })
    }

    /// Create a directory (and its parents) inside the user's workspace
    pub async fn create_dir(&self, user_id: &str, relative: &str) -> Result<Ack> {
        let workspace_dir = self.store.ensure_user_dir(user_id).await?;
        let target = self.store.resolve(user_id, relative)?;
        create_dir_inside(&workspace_dir, &normalize_relative(relative)?).await?;
        debug!(user_id = %user_id, path = %relative, "Directory created");
        Ok(Ack { path: target })
    }

    /// Delete a file, symlink or whole directory. Returns whether it was a
    /// directory.
    pub async fn delete(&self, user_id: &str, relative: &str) -> Result<bool> {
        let workspace_dir = self.store.user_dir(user_id)?;
        let target = self.store.resolve(user_id, relative)?;

        let metadata = match tokio::fs::symlink_metadata(&target).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WorkspaceError::NotFound(relative.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(parent) = target.parent() {
            ensure_inside(&workspace_dir, parent).await?;
        }

        let is_dir = metadata.is_dir();
        if is_dir {
            tokio::fs::remove_dir_all(&target).await?;
        } else {
            tokio::fs::remove_file(&target).await?;
        }
        debug!(user_id = %user_id, path = %relative, is_dir, "Deleted");
        Ok(is_dir)
    }

    /// Read a UTF-8 file from the user's workspace
    pub async fn read_file(&self, user_id: &str, relative: &str) -> Result<(PathBuf, String)> {
        let workspace_dir = self.store.user_dir(user_id)?;
        let target = self.store.resolve(user_id, relative)?;
        if tokio::fs::symlink_metadata(&target).await.is_err() {
            return Err(WorkspaceError::NotFound(relative.to_string()));
        }
        ensure_inside(&workspace_dir, &target).await?;
        let content = tokio::fs::read_to_string(&target).await?;
        Ok((target, content))
    }
}
