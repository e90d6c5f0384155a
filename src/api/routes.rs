use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Uploads
        .route("/upload", post(handlers::create_upload))
        .route(
            "/upload/:upload_id",
            get(handlers::get_upload).delete(handlers::delete_upload),
        )
        // Files, sizes are enforced while streaming
        .route(
            "/file/:upload_id",
            post(handlers::add_file).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/file/:upload_id/:file_id/:file_name",
            post(handlers::upload_file)
                .layer(DefaultBodyLimit::disable())
                .get(handlers::get_file)
                .delete(handlers::remove_file),
        )
        // Users
        .route(
            "/me",
            get(handlers::user_info).delete(handlers::delete_account),
        )
        .route("/me/token", post(handlers::create_token))
        .route("/me/token/:token", delete(handlers::revoke_token))
        .route(
            "/me/uploads",
            get(handlers::user_uploads).delete(handlers::remove_user_uploads),
        )
        .route("/me/stats", get(handlers::user_stats))
        // Admin
        .route("/stats", get(handlers::server_stats))
        .route("/users", get(handlers::list_users))
        // Server
        .route("/config", get(handlers::server_config))
        .route("/version", get(handlers::version))
        .route("/_internal/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
