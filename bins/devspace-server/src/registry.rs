//! Session Registry: one entry per open connection.

use crate::error::Result;
use crate::metrics;
use crate::workspace::WorkspaceStore;
use chrono::{DateTime, Utc};
use devspace_common::types::EnvironmentKey;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// One connected user. Environments are shared per user, the set here
/// only records which ones this connection has used.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub workspace_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub environments: HashSet<EnvironmentKey>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub environments: Vec<String>,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        let mut environments: Vec<String> =
            session.environments.iter().map(|k| k.language.to_string()).collect();
        environments.sort();
        Self {
            id: session.id,
            user_id: session.user_id.clone(),
            created_at: session.created_at,
            environments,
        }
    }
}

pub struct SessionRegistry {
    store: WorkspaceStore,
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl SessionRegistry {
    pub fn new(store: WorkspaceStore) -> Self {
        Self {
            store,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection for `user_id`, creating the workspace
    /// directory on first use.
    pub async fn open(&self, user_id: &str) -> Result<Session> {
        let workspace_dir = self.store.ensure_user_dir(user_id).await?;

        let session = Session {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            workspace_dir,
            created_at: Utc::now(),
            environments: HashSet::new(),
        };

        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id, session.clone());
        metrics::SESSIONS_ACTIVE.set(sessions.len() as i64);

        info!(session_id = %session.id, user_id = %user_id, "Session opened");
        Ok(session)
    }

    /// Drop the bookkeeping for a connection. Environments are left running
    /// so a reconnecting session of the same user reuses them.
    pub async fn close(&self, session_id: Uuid) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(&session_id);
        metrics::SESSIONS_ACTIVE.set(sessions.len() as i64);

        if let Some(ref session) = removed {
            info!(
                session_id = %session_id,
                user_id = %session.user_id,
                environments = session.environments.len(),
                "Session closed"
            );
        }
        removed
    }

    pub async fn record_environment(&self, session_id: Uuid, key: EnvironmentKey) {
        if let Some(session) = self.sessions.write().await.get_mut(&session_id) {
            session.environments.insert(key);
        }
    }

    pub async fn get(&self, session_id: Uuid) -> Option<Session> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut list: Vec<SessionInfo> = sessions.values().map(SessionInfo::from).collect();
        list.sort_by_key(|s| s.created_at);
        list
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkspaceError;
    use devspace_common::types::Language;

    async fn registry() -> (tempfile::TempDir, SessionRegistry) {
        let root = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::open(root.path()).await.unwrap();
        (root, SessionRegistry::new(store))
    }

    #[tokio::test]
    async fn test_open_rejects_empty_user() {
        let (_root, registry) = registry().await;
        let err = registry.open("").await.unwrap_err();
        assert!(matches!(err, WorkspaceError::InvalidUser(_)));
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_open_creates_workspace_dir() {
        let (root, registry) = registry().await;
        let session = registry.open("u1").await.unwrap();
        assert!(session.workspace_dir.is_dir());
        assert!(session.workspace_dir.starts_with(root.path().canonicalize().unwrap()));
        assert!(session.workspace_dir.ends_with("u1"));
    }

    #[tokio::test]
    async fn test_same_user_gets_independent_sessions() {
        let (_root, registry) = registry().await;
        let a = registry.open("u1").await.unwrap();
        let b = registry.open("u1").await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.workspace_dir, b.workspace_dir);
        assert_eq!(registry.len().await, 2);

        registry.close(a.id).await;
        assert!(registry.get(a.id).await.is_none());
        assert!(registry.get(b.id).await.is_some());
    }

    #[tokio::test]
    async fn test_record_environment_tracks_keys_per_session() {
        let (_root, registry) = registry().await;
        let session = registry.open("u1").await.unwrap();
        let key = EnvironmentKey::new("u1", Language::Python);
        registry.record_environment(session.id, key.clone()).await;
        registry.record_environment(session.id, key.clone()).await;

        let stored = registry.get(session.id).await.unwrap();
        assert_eq!(stored.environments.len(), 1);
        assert!(stored.environments.contains(&key));

        let closed = registry.close(session.id).await.unwrap();
        assert!(closed.environments.contains(&key));
        assert!(registry.close(session.id).await.is_none());
    }
}
