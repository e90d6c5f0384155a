use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use tokio_util::io::{ReaderStream, StreamReader};

use super::transport::{Source, Transport};
use crate::data::FileReader;
use crate::error::Error;
use crate::models::{File, Upload, UploadParams};

pub const UPLOAD_TOKEN_HEADER: &str = "X-Upload-Token";
pub const USER_TOKEN_HEADER: &str = "X-User-Token";
pub const IMPERSONATE_HEADER: &str = "X-Impersonate";

/// Talks to a file-drop server over HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    user_token: Option<String>,
    impersonate: Option<String>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Either JSend shape: `fail` carries `data.message`, `error` a top-level `message`.
#[derive(Deserialize)]
struct FailureBody {
    data: Option<FailureData>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct FailureData {
    message: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self, Error> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Invalid(format!("invalid server url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Invalid(format!(
                "invalid server url {base_url}: not a base url"
            )));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            user_token: None,
            impersonate: None,
        })
    }

    pub fn with_user_token(mut self, token: impl Into<String>) -> Self {
        self.user_token = Some(token.into());
        self
    }

    /// Act as another user, the user token must belong to an admin.
    pub fn with_impersonate(mut self, user_id: impl Into<String>) -> Self {
        self.impersonate = Some(user_id.into());
        self
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url, upload_token: Option<&str>) -> RequestBuilder {
        let mut builder = self.client.request(method, url);
        if let Some(token) = upload_token {
            builder = builder.header(UPLOAD_TOKEN_HEADER, token);
        }
        if let Some(token) = &self.user_token {
            builder = builder.header(USER_TOKEN_HEADER, token);
        }
        if let Some(user) = &self.impersonate {
            builder = builder.header(IMPERSONATE_HEADER, user);
        }
        builder
    }

    fn file_url(&self, upload: &Upload, file: &File) -> Url {
        self.url(&["file", &upload.id, &file.id, &file.name])
    }
}

async fn send(builder: RequestBuilder) -> Result<Response, Error> {
    let response = builder
        .send()
        .await
        .map_err(|e| Error::backend("request failed", e))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<FailureBody>(&body)
        .ok()
        .and_then(|b| b.data.and_then(|d| d.message).or(b.message))
        .unwrap_or(body);
    Err(error_for_status(status, message))
}

async fn parse<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, Error> {
    let envelope: Envelope<T> = send(builder)
        .await?
        .json()
        .await
        .map_err(|e| Error::backend("invalid response body", e))?;
    Ok(envelope.data)
}

/// Inverse of the server's error to status mapping.
pub fn error_for_status(status: StatusCode, message: String) -> Error {
    match status {
        StatusCode::BAD_REQUEST => Error::Invalid(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Forbidden(message),
        StatusCode::NOT_FOUND => Error::NotFound(message),
        StatusCode::METHOD_NOT_ALLOWED => Error::Unsupported(message),
        StatusCode::CONFLICT => Error::Conflict(message),
        StatusCode::GONE => Error::Expired(message),
        _ => Error::Backend(format!("{status}: {message}")),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn create_upload(&self, params: &UploadParams) -> Result<Upload, Error> {
        let url = self.url(&["upload"]);
        parse(self.request(Method::POST, url, None).json(params)).await
    }

    async fn get_upload(&self, id: &str, upload_token: Option<&str>) -> Result<Upload, Error> {
        let url = self.url(&["upload", id]);
        parse(self.request(Method::GET, url, upload_token)).await
    }

    async fn upload_file(
        &self,
        upload: &Upload,
        file_id: Option<&str>,
        name: &str,
        source: Source,
    ) -> Result<File, Error> {
        let url = match file_id {
            Some(id) => self.url(&["file", &upload.id, id, name]),
            None => self.url(&["file", &upload.id]),
        };
        let part = Part::stream(Body::wrap_stream(ReaderStream::new(source)))
            .file_name(name.to_string());
        let form = Form::new().part("file", part);

        let builder = self
            .request(Method::POST, url, upload.upload_token.as_deref())
            .multipart(form);
        parse(builder).await
    }

    async fn download_file(&self, upload: &Upload, file: &File) -> Result<FileReader, Error> {
        let url = self.file_url(upload, file);
        let response = send(self.request(Method::GET, url, upload.upload_token.as_deref())).await?;

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }

    async fn remove_file(&self, upload: &Upload, file: &File) -> Result<File, Error> {
        let url = self.file_url(upload, file);
        parse(self.request(Method::DELETE, url, upload.upload_token.as_deref())).await
    }

    async fn remove_upload(&self, upload: &Upload) -> Result<(), Error> {
        let url = self.url(&["upload", &upload.id]);
        let _: IgnoredAny =
            parse(self.request(Method::DELETE, url, upload.upload_token.as_deref())).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_escaped_file_urls() {
        let transport = HttpTransport::new("http://localhost:8080/api/").unwrap();
        let url = transport.url(&["file", "up1", "f1", "my file?.txt"]);
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/api/file/up1/f1/my%20file%3F.txt"
        );
    }

    #[test]
    fn maps_statuses_back_to_errors() {
        assert!(matches!(
            error_for_status(StatusCode::GONE, "gone".into()),
            Error::Expired(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::CONFLICT, "busy".into()),
            Error::Conflict(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::INTERNAL_SERVER_ERROR, "boom".into()),
            Error::Backend(_)
        ));
    }

    #[test]
    fn rejects_unusable_urls() {
        assert!(HttpTransport::new("not a url").is_err());
        assert!(HttpTransport::new("mailto:someone@example.com").is_err());
    }
}
