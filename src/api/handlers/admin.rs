use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::api::auth::Auth;
use crate::api::response::{ApiError, JSend};
use crate::config::UploadPolicy;
use crate::models::{ServerStats, User};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub name: String,
    pub version: String,
}

/// The upload rules clients need to know before creating an upload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub default_ttl: u64,
    pub max_ttl: u64,
    pub max_file_size: u64,
    pub max_files_per_upload: usize,
    pub one_shot: bool,
    pub removable: bool,
    pub stream: bool,
    pub protected_by_password: bool,
    pub no_anonymous_uploads: bool,
    pub anonymous_contributions: bool,
}

impl From<&UploadPolicy> for ConfigResponse {
    fn from(policy: &UploadPolicy) -> Self {
        Self {
            default_ttl: policy.default_ttl,
            max_ttl: policy.max_ttl,
            max_file_size: policy.max_file_size,
            max_files_per_upload: policy.max_files_per_upload,
            one_shot: policy.one_shot,
            removable: policy.removable,
            stream: policy.stream,
            protected_by_password: policy.password,
            no_anonymous_uploads: policy.no_anonymous_uploads,
            anonymous_contributions: policy.anonymous_contributions,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health() -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn version() -> Json<JSend<VersionResponse>> {
    JSend::success(VersionResponse {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn server_config(State(state): State<Arc<AppState>>) -> Json<JSend<ConfigResponse>> {
    JSend::success(ConfigResponse::from(&state.config.uploads))
}

pub async fn server_stats(
    State(state): State<Arc<AppState>>,
    Auth(caller): Auth,
) -> Result<Json<JSend<ServerStats>>, ApiError> {
    let stats = state.manager.server_statistics(&caller)?;
    Ok(JSend::success(stats))
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Auth(caller): Auth,
) -> Result<Json<JSend<Vec<User>>>, ApiError> {
    let users = state.manager.users(&caller)?;
    Ok(JSend::success(users))
}
