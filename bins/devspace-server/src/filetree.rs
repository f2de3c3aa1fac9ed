//! File tree snapshots of a user's workspace for the editor sidebar.
//!
//! The tree is rebuilt from disk on every request; only the open/closed
//! state of directories is remembered, per user, in memory.

use crate::workspace::SCRATCH_DIR;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tokio::sync::RwLock;

pub const ROOT_NAME: &str = "root";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: u64,
    pub name: String,
    pub is_dir: bool,
    /// Workspace-relative, forward slashes; empty for the root
    pub path: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch
    pub modified_time: u64,
    pub depth: usize,
    pub is_open: bool,
    pub children_count: usize,
    pub children: Vec<TreeNode>,
}

/// Row of the flattened list used for virtualized rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatNode {
    pub id: u64,
    pub name: String,
    pub is_dir: bool,
    pub path: String,
    pub depth: usize,
    pub is_open: bool,
    pub children_count: usize,
    pub is_visible: bool,
}

/// Snapshot `root` into a tree. Ids are assigned in pre-order starting at 0
/// for the root. Symlinks are listed but never followed.
pub fn build_tree(root: &Path, open: &HashSet<String>) -> io::Result<TreeNode> {
    let mut next_id = 0;
    let metadata = fs::metadata(root)?;
    let mut node = TreeNode {
        id: next_id,
        name: ROOT_NAME.to_string(),
        is_dir: true,
        path: String::new(),
        size: metadata.len(),
        modified_time: modified_ms(&metadata),
        depth: 0,
        is_open: true,
        children_count: 0,
        children: Vec::new(),
    };
    next_id += 1;
    node.children = read_children(root, "", 1, open, &mut next_id)?;
    node.children_count = node.children.len();
    Ok(node)
}

fn read_children(
    dir: &Path,
    parent_path: &str,
    depth: usize,
    open: &HashSet<String>,
    next_id: &mut u64,
) -> io::Result<Vec<TreeNode>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if depth == 1 && name == SCRATCH_DIR {
            continue;
        }
        let metadata = entry.path().symlink_metadata()?;
        entries.push((name, metadata));
    }
    entries.sort_by(|(a_name, a), (b_name, b)| {
        b.is_dir().cmp(&a.is_dir()).then_with(|| a_name.cmp(b_name))
    });

    let mut nodes = Vec::with_capacity(entries.len());
    for (name, metadata) in entries {
        let path = if parent_path.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", parent_path, name)
        };
        let is_dir = metadata.is_dir();
        let id = *next_id;
        *next_id += 1;

        let children = if is_dir {
            read_children(&dir.join(&name), &path, depth + 1, open, next_id)?
        } else {
            Vec::new()
        };

        nodes.push(TreeNode {
            id,
            is_open: is_dir && open.contains(&path),
            name,
            is_dir,
            path,
            size: metadata.len(),
            modified_time: modified_ms(&metadata),
            depth,
            children_count: children.len(),
            children,
        });
    }
    Ok(nodes)
}

fn modified_ms(metadata: &fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The root plus every node whose ancestors are all open.
pub fn flatten(tree: &TreeNode) -> Vec<FlatNode> {
    let mut out = Vec::new();
    flatten_into(tree, &mut out);
    out
}

fn flatten_into(node: &TreeNode, out: &mut Vec<FlatNode>) {
    out.push(FlatNode {
        id: node.id,
        name: node.name.clone(),
        is_dir: node.is_dir,
        path: node.path.clone(),
        depth: node.depth,
        is_open: node.is_open,
        children_count: node.children_count,
        is_visible: true,
    });
    if node.is_dir && node.is_open {
        for child in &node.children {
            flatten_into(child, out);
        }
    }
}

/// Which directories each user has expanded
#[derive(Debug, Default)]
pub struct OpenDirs {
    by_user: RwLock<HashMap<String, HashSet<String>>>,
}

impl OpenDirs {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, user_id: &str) -> HashSet<String> {
        self.by_user
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Flip `path` and return whether it is now open
    pub async fn toggle(&self, user_id: &str, path: &str) -> bool {
        let mut by_user = self.by_user.write().await;
        let open = by_user.entry(user_id.to_string()).or_default();
        if open.remove(path) {
            false
        } else {
            open.insert(path.to_string());
            true
        }
    }

    /// Forget `path` and everything below it
    pub async fn forget(&self, user_id: &str, path: &str) {
        let prefix = format!("{}/", path);
        if let Some(open) = self.by_user.write().await.get_mut(user_id) {
            open.retain(|p| p != path && !p.starts_with(&prefix));
        }
    }
}
