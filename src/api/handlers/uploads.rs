use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use super::open_upload;
use crate::access::{present, UploadAccess};
use crate::api::auth::Auth;
use crate::api::response::{ApiError, AppJson, JSend};
use crate::models::{Upload, UploadParams};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub id: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_upload(
    State(state): State<Arc<AppState>>,
    Auth(caller): Auth,
    AppJson(params): AppJson<UploadParams>,
) -> Result<Json<JSend<Upload>>, ApiError> {
    let upload = state.manager.create_upload(&caller, params)?;

    // The creator is the one caller who always gets the upload token
    let creator = UploadAccess {
        upload_admin: true,
        credentials_ok: true,
    };
    Ok(JSend::success(present(&upload, creator)))
}

pub async fn get_upload(
    State(state): State<Arc<AppState>>,
    Auth(caller): Auth,
    Path(upload_id): Path<String>,
) -> Result<Json<JSend<Upload>>, ApiError> {
    let (upload, access) = open_upload(&state, &caller, &upload_id)?;
    Ok(JSend::success(present(&upload, access)))
}

pub async fn delete_upload(
    State(state): State<Arc<AppState>>,
    Auth(caller): Auth,
    Path(upload_id): Path<String>,
) -> Result<Json<JSend<DeletedResponse>>, ApiError> {
    let (upload, access) = open_upload(&state, &caller, &upload_id)?;
    state.manager.delete_upload(&upload, access).await?;

    Ok(JSend::success(DeletedResponse { id: upload_id }))
}
