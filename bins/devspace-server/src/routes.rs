use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::handlers;
use crate::state::AppState;
use crate::ws;

pub fn routes() -> Router<AppState> {
    Router::new()
        // Session protocol
        .route("/ws", get(ws::ws_upgrade))
        // File tree
        .route("/files", get(handlers::get_tree))
        .route("/files/toggle", post(handlers::toggle_dir))
        .route("/files/content", get(handlers::get_content))
        .route("/files/create", post(handlers::create_entry))
        .route("/files/delete", delete(handlers::delete_entry))
        // Administration
        .route(
            "/environments",
            get(handlers::list_environments).delete(handlers::delete_environment),
        )
        .route("/sessions", get(handlers::list_sessions))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
}
