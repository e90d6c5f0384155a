use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::TryStreamExt;
use std::io;
use std::sync::Arc;
use tokio_util::io::{ReaderStream, StreamReader};

use super::open_upload;
use crate::access::UploadAccess;
use crate::api::auth::Auth;
use crate::api::response::{ApiError, JSend};
use crate::manager::FileTarget;
use crate::models::{File, Upload};
use crate::AppState;

const FILE_FIELD: &str = "file";

/// Stream the `file` part of a multipart body into the upload.
async fn store_part(
    state: &AppState,
    upload: &Upload,
    access: UploadAccess,
    declared: Option<&str>,
    mut multipart: Multipart,
) -> Result<File, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart data: {e}")))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let name = field.file_name().unwrap_or_default().to_string();
        let target = match declared {
            Some(file_id) => FileTarget::Declared(file_id),
            None => FileTarget::New(&name),
        };

        let mut reader = StreamReader::new(Box::pin(field.map_err(io::Error::other)));
        let mut file = state
            .manager
            .add_file(upload, access, target, &mut reader)
            .await?;
        file.sanitize();
        return Ok(file);
    }

    Err(ApiError::bad_request(format!(
        "missing \"{FILE_FIELD}\" part in multipart body"
    )))
}

pub async fn add_file(
    State(state): State<Arc<AppState>>,
    Auth(caller): Auth,
    Path(upload_id): Path<String>,
    multipart: Multipart,
) -> Result<Json<JSend<File>>, ApiError> {
    let (upload, access) = open_upload(&state, &caller, &upload_id)?;
    let file = store_part(&state, &upload, access, None, multipart).await?;
    Ok(JSend::success(file))
}

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    Auth(caller): Auth,
    Path((upload_id, file_id, _file_name)): Path<(String, String, String)>,
    multipart: Multipart,
) -> Result<Json<JSend<File>>, ApiError> {
    let (upload, access) = open_upload(&state, &caller, &upload_id)?;
    let file = store_part(&state, &upload, access, Some(&file_id), multipart).await?;
    Ok(JSend::success(file))
}

/// The file behind a download URL, the name must match as well.
fn named_file<'a>(
    upload: &'a Upload,
    file_id: &str,
    file_name: &str,
) -> Result<&'a File, ApiError> {
    upload
        .file(file_id)
        .filter(|f| f.name == file_name)
        .ok_or_else(|| {
            ApiError::not_found(format!(
                "file {file_id} ({file_name}) not found in upload {}",
                upload.id
            ))
        })
}

fn content_disposition(name: &str) -> HeaderValue {
    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    HeaderValue::from_bytes(format!("attachment; filename=\"{escaped}\"").as_bytes())
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Auth(caller): Auth,
    Path((upload_id, file_id, file_name)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let (upload, access) = open_upload(&state, &caller, &upload_id)?;
    named_file(&upload, &file_id, &file_name)?;

    let download = state.manager.get_file(&upload, access, &file_id).await?;
    let file = download.file;

    let mut headers = HeaderMap::new();
    let mime_type = file
        .mime_type
        .as_deref()
        .and_then(|m| HeaderValue::from_str(m).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, mime_type);
    if !upload.stream {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.size));
    }
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(&file.name));
    if upload.one_shot {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    }

    let body = Body::from_stream(ReaderStream::new(download.reader));
    Ok((headers, body).into_response())
}

pub async fn remove_file(
    State(state): State<Arc<AppState>>,
    Auth(caller): Auth,
    Path((upload_id, file_id, file_name)): Path<(String, String, String)>,
) -> Result<Json<JSend<File>>, ApiError> {
    let (upload, access) = open_upload(&state, &caller, &upload_id)?;
    named_file(&upload, &file_id, &file_name)?;

    let mut file = state.manager.remove_file(&upload, access, &file_id).await?;
    file.sanitize();
    Ok(JSend::success(file))
}
