use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::access::{authorize, present};
use crate::api::auth::Auth;
use crate::api::response::{ApiError, AppQuery, JSend};
use crate::models::{Token, Upload, User, UserStats};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TokenFilter {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenParams {
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RemovedUploadsResponse {
    pub removed: usize,
}

#[derive(Debug, Serialize)]
pub struct DeletedAccountResponse {
    pub id: String,
}

// ============================================================================
// Account
// ============================================================================

pub async fn user_info(
    State(state): State<Arc<AppState>>,
    Auth(caller): Auth,
) -> Result<Json<JSend<User>>, ApiError> {
    let user = state.manager.user_info(&caller)?;
    Ok(JSend::success(user))
}

pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    Auth(caller): Auth,
) -> Result<Json<JSend<DeletedAccountResponse>>, ApiError> {
    state.manager.delete_account(&caller)?;
    let id = caller.user.map(|u| u.id).unwrap_or_default();
    Ok(JSend::success(DeletedAccountResponse { id }))
}

// ============================================================================
// Tokens
// ============================================================================

/// The body is optional, an empty one creates a token without comment.
pub async fn create_token(
    State(state): State<Arc<AppState>>,
    Auth(caller): Auth,
    body: Bytes,
) -> Result<Json<JSend<Token>>, ApiError> {
    let params = if body.is_empty() {
        TokenParams::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|_| ApiError::bad_request("Malformed JSON in request body"))?
    };

    let token = state.manager.create_token(&caller, params.comment)?;
    Ok(JSend::success(token))
}

pub async fn revoke_token(
    State(state): State<Arc<AppState>>,
    Auth(caller): Auth,
    Path(token): Path<String>,
) -> Result<Json<JSend<Token>>, ApiError> {
    let revoked = state.manager.revoke_token(&caller, &token)?;
    Ok(JSend::success(revoked))
}

// ============================================================================
// Own uploads
// ============================================================================

pub async fn user_uploads(
    State(state): State<Arc<AppState>>,
    Auth(caller): Auth,
    AppQuery(filter): AppQuery<TokenFilter>,
) -> Result<Json<JSend<Vec<Upload>>>, ApiError> {
    let uploads = state
        .manager
        .user_uploads(&caller, filter.token.as_deref())?
        .iter()
        .map(|upload| present(upload, authorize(upload, &caller)))
        .collect();

    Ok(JSend::success(uploads))
}

pub async fn remove_user_uploads(
    State(state): State<Arc<AppState>>,
    Auth(caller): Auth,
    AppQuery(filter): AppQuery<TokenFilter>,
) -> Result<Json<JSend<RemovedUploadsResponse>>, ApiError> {
    let removed = state
        .manager
        .remove_user_uploads(&caller, filter.token.as_deref())
        .await?;
    Ok(JSend::success(RemovedUploadsResponse { removed }))
}

pub async fn user_stats(
    State(state): State<Arc<AppState>>,
    Auth(caller): Auth,
    AppQuery(filter): AppQuery<TokenFilter>,
) -> Result<Json<JSend<UserStats>>, ApiError> {
    let stats = state
        .manager
        .user_statistics(&caller, filter.token.as_deref())?;
    Ok(JSend::success(stats))
}
