use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use std::sync::Arc;

use crate::access::Caller;
use crate::api::response::ApiError;
use crate::client::{IMPERSONATE_HEADER, UPLOAD_TOKEN_HEADER, USER_TOKEN_HEADER};
use crate::AppState;

/// The credentials a request carries, resolved against the user store.
pub struct Auth(pub Caller);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for Auth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, ApiError> {
        let headers = &parts.headers;
        let mut caller = Caller::anonymous();

        if let Some(token) = header(headers, USER_TOKEN_HEADER) {
            let user = state
                .metadata
                .get_user_from_token(token)?
                .ok_or_else(|| ApiError::forbidden("invalid token"))?;
            caller = caller.with_token(user, token);
        }

        if let Some(target) = header(headers, IMPERSONATE_HEADER) {
            let user = state
                .metadata
                .get_user(target)?
                .ok_or_else(|| ApiError::not_found(format!("user {target} not found")))?;
            caller = caller.impersonate(user)?;
        }

        if let Some(token) = header(headers, UPLOAD_TOKEN_HEADER) {
            caller = caller.with_upload_token(token);
        }

        if let Some(credentials) = header(headers, "authorization")
            .and_then(|v| v.strip_prefix("Basic "))
            .map(str::trim)
        {
            caller = caller.with_basic_auth(credentials);
        }

        // First hop of a proxied request
        if let Some(ip) = header(headers, "x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
        {
            caller = caller.with_remote_ip(ip);
        }

        Ok(Auth(caller))
    }
}
