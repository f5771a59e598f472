use axum::{
    Router,
    routing::get,
};

use crate::AppState;
use crate::handlers;

/// Create file server routes
pub fn file_routes() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Directory listing
        .route("/entries", get(handlers::list_root_entries))
        .route("/entries/{*path}", get(handlers::list_entries))
        // File and directory content
        .route("/content", get(handlers::get_root_content))
        .route(
            "/content/{*path}",
            get(handlers::get_content).post(handlers::upload_content),
        )
}
