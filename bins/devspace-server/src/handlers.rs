// HTTP route handlers: file tree, environment admin, health and metrics

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use devspace_common::types::{EnvironmentKey, Language};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use tracing::{error, info};

use crate::error::WorkspaceError;
use crate::filetree::{self, FlatNode, TreeNode};
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ContentQuery {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct EnvironmentQuery {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub language: String,
}

#[derive(Debug, Deserialize)]
pub struct PathBody {
    pub path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBody {
    pub file_path: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_directory: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeResponse {
    pub file_tree: TreeNode,
    pub flattened_nodes: Vec<FlatNode>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub file_tree: TreeNode,
    pub flattened_nodes: Vec<FlatNode>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub modified_time: u64,
    pub extension: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentResponse {
    pub content: String,
    pub file_info: FileInfo,
}

/// Error body shared by every HTTP handler
pub struct ApiError(StatusCode, String);

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self(StatusCode::BAD_REQUEST, message.into())
    }
}

impl From<WorkspaceError> for ApiError {
    fn from(err: WorkspaceError) -> Self {
        let status = match err {
            WorkspaceError::InvalidUser(_)
            | WorkspaceError::InvalidPath(_)
            | WorkspaceError::UnsupportedLanguage(_)
            | WorkspaceError::MalformedMessage(_) => StatusCode::BAD_REQUEST,
            WorkspaceError::NotFound(_) => StatusCode::NOT_FOUND,
            WorkspaceError::EnvironmentBusy(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.0.is_server_error() {
            error!(status = %self.0, error = %self.1, "Request failed");
        }
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn require_user(id: &str) -> Result<&str, ApiError> {
    if id.is_empty() {
        return Err(ApiError::bad_request("No user id found"));
    }
    Ok(id)
}

/// Build the tree and flattened list for a user off the async runtime
async fn snapshot(state: &AppState, user_id: &str) -> Result<(TreeNode, Vec<FlatNode>), ApiError> {
    let dir = state.store.ensure_user_dir(user_id).await?;
    let open = state.open_dirs.get(user_id).await;

    let tree = tokio::task::spawn_blocking(move || filetree::build_tree(&dir, &open))
        .await
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(WorkspaceError::from)?;
    let flat = filetree::flatten(&tree);
    Ok((tree, flat))
}

async fn mutation(state: &AppState, user_id: &str, message: Option<String>) -> ApiResult<MutationResponse> {
    let (file_tree, flattened_nodes) = snapshot(state, user_id).await?;
    Ok(Json(MutationResponse {
        success: true,
        message,
        file_tree,
        flattened_nodes,
    }))
}

/// GET /files?id= - Full tree plus visible rows
pub async fn get_tree(State(state): State<AppState>, Query(q): Query<UserQuery>) -> ApiResult<TreeResponse> {
    let user_id = require_user(&q.id)?;
    let (file_tree, flattened_nodes) = snapshot(&state, user_id).await?;
    Ok(Json(TreeResponse {
        file_tree,
        flattened_nodes,
    }))
}

/// POST /files/toggle?id= - Open or close a directory
pub async fn toggle_dir(
    State(state): State<AppState>,
    Query(q): Query<UserQuery>,
    Json(body): Json<PathBody>,
) -> ApiResult<MutationResponse> {
    let user_id = require_user(&q.id)?;
    if body.path.is_empty() {
        return Err(ApiError::bad_request("Node path is required"));
    }
    // validate like any other workspace path
    state.store.resolve(user_id, &body.path)?;
    let is_open = state.open_dirs.toggle(user_id, &body.path).await;
    let verb = if is_open { "Opened" } else { "Closed" };
    mutation(&state, user_id, Some(format!("{} {}", verb, body.path))).await
}

/// GET /files/content?id=&path= - File content for the editor
pub async fn get_content(
    State(state): State<AppState>,
    Query(q): Query<ContentQuery>,
) -> ApiResult<ContentResponse> {
    let user_id = require_user(&q.id)?;
    if q.path.is_empty() {
        return Err(ApiError::bad_request("Invalid path parameter"));
    }

    let (full_path, content) = state.files.read_file(user_id, &q.path).await?;
    let metadata = tokio::fs::metadata(&full_path).await.map_err(WorkspaceError::from)?;
    let modified_time = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let relative = Path::new(&q.path);
    Ok(Json(ContentResponse {
        content,
        file_info: FileInfo {
            name: relative
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: q.path.clone(),
            size: metadata.len(),
            modified_time,
            extension: relative
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                .unwrap_or_default(),
        },
    }))
}

/// POST /files/create?id= - New file or directory
pub async fn create_entry(
    State(state): State<AppState>,
    Query(q): Query<UserQuery>,
    Json(body): Json<CreateBody>,
) -> ApiResult<MutationResponse> {
    let user_id = require_user(&q.id)?;
    if body.file_path.is_empty() {
        return Err(ApiError::bad_request("File path is required"));
    }
    let relative = body.file_path.trim_start_matches('/');

    let message = if body.is_directory {
        state.files.create_dir(user_id, relative).await?;
        format!("Directory created: {}", relative)
    } else {
        state.files.write_user_file(user_id, relative, &body.content).await?;
        format!("File created: {}", relative)
    };
    info!(user_id = %user_id, path = %relative, "Workspace entry created");
    mutation(&state, user_id, Some(message)).await
}

/// DELETE /files/delete?id= - Remove a file or directory tree
pub async fn delete_entry(
    State(state): State<AppState>,
    Query(q): Query<UserQuery>,
    Json(body): Json<PathBody>,
) -> ApiResult<MutationResponse> {
    let user_id = require_user(&q.id)?;
    if body.path.is_empty() {
        return Err(ApiError::bad_request("File path is required"));
    }

    let was_dir = state.files.delete(user_id, &body.path).await?;
    if was_dir {
        state.open_dirs.forget(user_id, &body.path).await;
    }
    info!(user_id = %user_id, path = %body.path, "Workspace entry deleted");
    let message = if was_dir { "Directory deleted" } else { "File deleted" };
    mutation(&state, user_id, Some(message.to_string())).await
}

/// GET /environments - Every tracked (user, language) environment
pub async fn list_environments(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sandbox.snapshot().await)
}

/// DELETE /environments?id=&language= - Tear an environment down
pub async fn delete_environment(
    State(state): State<AppState>,
    Query(q): Query<EnvironmentQuery>,
) -> Result<Response, ApiError> {
    let user_id = require_user(&q.id)?;
    let language: Language = q
        .language
        .parse()
        .map_err(|_| WorkspaceError::UnsupportedLanguage(q.language.clone()))?;

    let key = EnvironmentKey::new(user_id, language);
    if state.sandbox.teardown(&key).await? {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Err(WorkspaceError::NotFound(key.to_string()).into())
    }
}

/// GET /sessions - Open connections
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.list().await)
}

/// GET /health - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: WorkspaceError) -> StatusCode {
        ApiError::from(err).0
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_of(WorkspaceError::EnvironmentBusy("u1/python".into())), StatusCode::CONFLICT);
        assert_eq!(status_of(WorkspaceError::ExecFailed("daemon gone".into())), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_of(WorkspaceError::NotFound("a.txt".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(WorkspaceError::InvalidPath("..".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(WorkspaceError::ExecutionTimeout { timeout_ms: 10 }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
