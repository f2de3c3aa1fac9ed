//! Workspace Directory Store.
//!
//! One directory per user under a shared root. The same directory is bind
//! mounted into every execution environment of that user, so anything the
//! client writes here is visible to the next run.

use crate::error::{Result, WorkspaceError};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Directory inside a workspace holding per-run scratch files
pub const SCRATCH_DIR: &str = ".devspace";

const MAX_USER_ID_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct WorkspaceStore {
    root: PathBuf,
}

impl WorkspaceStore {
    /// `root` should be absolute; container bind mounts are resolved on the host.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root if needed and canonicalize it
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let root = tokio::fs::canonicalize(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic workspace path for a user.
    pub fn user_dir(&self, user_id: &str) -> Result<PathBuf> {
        validate_user_id(user_id)?;
        Ok(self.root.join(user_id))
    }

    /// Create the user's workspace directory if absent. Idempotent.
    pub async fn ensure_user_dir(&self, user_id: &str) -> Result<PathBuf> {
        let dir = self.user_dir(user_id)?;
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Resolve a client-supplied relative path inside the user's workspace.
    ///
    /// Purely lexical: nothing is touched on disk.
    pub fn resolve(&self, user_id: &str, relative: &str) -> Result<PathBuf> {
        let dir = self.user_dir(user_id)?;
        let relative = normalize_relative(relative)?;
        Ok(dir.join(relative))
    }
}

/// Reject identifiers that are empty or unusable as a single path component
/// and container name fragment.
pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(WorkspaceError::InvalidUser("user id is empty".to_string()));
    }
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(WorkspaceError::InvalidUser(format!(
            "user id longer than {} characters",
            MAX_USER_ID_LEN
        )));
    }
    if user_id == "." || user_id == ".." {
        return Err(WorkspaceError::InvalidUser(user_id.to_string()));
    }
    let valid = user_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid {
        return Err(WorkspaceError::InvalidUser(format!(
            "{:?} contains characters outside [A-Za-z0-9_.-]",
            user_id
        )));
    }
    Ok(())
}

/// Normalize a relative path, rejecting anything that could leave the
/// workspace: absolute paths, `..`, drive prefixes, NUL bytes.
pub fn normalize_relative(relative: &str) -> Result<PathBuf> {
    if relative.contains('\0') {
        return Err(WorkspaceError::InvalidPath("path contains a NUL byte".to_string()));
    }
    let mut normalized = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(WorkspaceError::InvalidPath(format!(
                    "{} escapes the workspace",
                    relative
                )));
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(WorkspaceError::InvalidPath("path is empty".to_string()));
    }
    Ok(normalized)
}

/// Forward-slash form of a normalized relative path, used inside containers.
pub fn to_container_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Create `relative` under `workspace_dir` one component at a time.
///
/// Existing components must be real directories: a symlink anywhere on the
/// way is rejected before anything is created, so a link planted by user
/// code cannot steer directory creation out of the workspace.
pub async fn create_dir_inside(workspace_dir: &Path, relative: &Path) -> Result<PathBuf> {
    let mut current = workspace_dir.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => current.push(part),
            Component::CurDir => continue,
            _ => {
                return Err(WorkspaceError::InvalidPath(format!(
                    "{} escapes the workspace",
                    relative.display()
                )))
            }
        }
        if is_real_dir(&current).await? {
            continue;
        }
        match tokio::fs::create_dir(&current).await {
            Ok(()) => {}
            // lost a race with another creator; whatever won must pass the same check
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if !is_real_dir(&current).await? {
                    return Err(e.into());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    ensure_inside(workspace_dir, &current).await?;
    Ok(current)
}

/// `Ok(false)` if absent, `Ok(true)` for a directory, an error for anything else.
async fn is_real_dir(path: &Path) -> Result<bool> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) if metadata.file_type().is_symlink() => Err(WorkspaceError::InvalidPath(
            format!("{} is a symlink", path.display()),
        )),
        Ok(metadata) if metadata.is_dir() => Ok(true),
        Ok(_) => Err(WorkspaceError::Io(format!("{} is not a directory", path.display()))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Fail if `path` resolves outside `workspace` once symlinks are followed.
pub async fn ensure_inside(workspace: &Path, path: &Path) -> Result<()> {
    let workspace = tokio::fs::canonicalize(workspace).await?;
    let resolved = tokio::fs::canonicalize(path).await?;
    if !resolved.starts_with(&workspace) {
        return Err(WorkspaceError::InvalidPath(format!(
            "{} resolves outside the workspace",
            resolved.display()
        )));
    }
    Ok(())
}

/// Write `content` to a file that must not exist yet. `create_new` never
/// follows a symlink sitting at `path`.
pub async fn write_new_file(path: &Path, content: &str) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
