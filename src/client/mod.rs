//! Caller side of the upload lifecycle.
//!
//! A [`ClientUpload`] collects files, creates the upload on first use and
//! pushes every file exactly once, whatever the number of tasks asking for
//! it. Creation and each file upload sit behind a `OnceCell`, so concurrent
//! callers all await the same attempt and see the same result.

mod http;
mod transport;

pub use http::{
    error_for_status, HttpTransport, IMPERSONATE_HEADER, UPLOAD_TOKEN_HEADER, USER_TOKEN_HEADER,
};
pub use transport::{LocalTransport, Source, Transport};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::data::FileReader;
use crate::error::Error;
use crate::models::{File, FileParams, FileStatus, Upload, UploadParams};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Client {
    transport: Arc<dyn Transport>,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// A local upload, nothing is sent until it is created.
    pub fn new_upload(&self, params: UploadParams) -> Arc<ClientUpload> {
        Arc::new(ClientUpload {
            transport: Arc::clone(&self.transport),
            params,
            files: Mutex::new(Vec::new()),
            created: OnceCell::new(),
            upload_token: Mutex::new(None),
            info: Mutex::new(None),
        })
    }

    /// Attach to an upload that already exists on the server.
    pub async fn get_upload(
        &self,
        id: &str,
        upload_token: Option<&str>,
    ) -> Result<Arc<ClientUpload>, Error> {
        let upload = self.transport.get_upload(id, upload_token).await?;

        let files = upload
            .files
            .iter()
            .enumerate()
            .map(|(i, info)| {
                let reference = info.reference.clone().unwrap_or_else(|| i.to_string());
                let file = ClientFile::new(info.name.clone(), reference, None);
                file.set_info(info.clone());
                Arc::new(file)
            })
            .collect();

        Ok(Arc::new(ClientUpload {
            transport: Arc::clone(&self.transport),
            params: UploadParams::default(),
            files: Mutex::new(files),
            upload_token: Mutex::new(
                upload_token
                    .map(str::to_string)
                    .or_else(|| upload.upload_token.clone()),
            ),
            info: Mutex::new(Some(upload.clone())),
            created: OnceCell::new_with(Some(Ok(upload))),
        }))
    }
}

pub struct ClientUpload {
    transport: Arc<dyn Transport>,
    params: UploadParams,
    files: Mutex<Vec<Arc<ClientFile>>>,
    created: OnceCell<Result<Upload, Error>>,
    upload_token: Mutex<Option<String>>,
    info: Mutex<Option<Upload>>,
}

impl ClientUpload {
    /// Latest server view of the upload, `None` before creation.
    pub fn info(&self) -> Option<Upload> {
        lock(&self.info).clone()
    }

    pub fn id(&self) -> Option<String> {
        lock(&self.info).as_ref().map(|u| u.id.clone())
    }

    pub fn files(&self) -> Vec<Arc<ClientFile>> {
        lock(&self.files).clone()
    }

    pub fn upload_token(&self) -> Option<String> {
        lock(&self.upload_token).clone()
    }

    /// Replace the ownership proof sent with the next calls, `None` drops it.
    pub fn set_upload_token(&self, token: Option<String>) {
        *lock(&self.upload_token) = token;
    }

    /// Attach a file. Files attached before creation are declared with it.
    pub fn add_file(&self, name: impl Into<String>, source: Source) -> Arc<ClientFile> {
        let mut files = lock(&self.files);
        let file = Arc::new(ClientFile::new(
            name.into(),
            files.len().to_string(),
            Some(source),
        ));
        files.push(Arc::clone(&file));
        file
    }

    /// Create the upload on the server, once.
    pub async fn create(&self) -> Result<Upload, Error> {
        self.created
            .get_or_init(|| self.do_create())
            .await
            .clone()
    }

    async fn do_create(&self) -> Result<Upload, Error> {
        let files = self.files();
        let mut params = self.params.clone();
        params.files = files
            .iter()
            .map(|f| FileParams {
                name: f.name.clone(),
                reference: Some(f.reference.clone()),
            })
            .collect();

        let upload = self.transport.create_upload(&params).await?;
        for file in &files {
            let info = upload
                .files
                .iter()
                .find(|info| info.reference.as_deref() == Some(file.reference.as_str()))
                .ok_or_else(|| {
                    Error::Invalid(format!(
                        "no file with reference {} in the created upload",
                        file.reference
                    ))
                })?;
            file.set_info(info.clone());
        }

        debug!(upload_id = %upload.id, files = files.len(), "upload created");
        *lock(&self.upload_token) = upload.upload_token.clone();
        *lock(&self.info) = Some(upload.clone());
        Ok(upload)
    }

    /// The created upload, carrying the current upload token.
    async fn authenticated(&self) -> Result<Upload, Error> {
        let mut upload = self.create().await?;
        upload.upload_token = self.upload_token();
        Ok(upload)
    }

    /// Send one file, once.
    pub async fn upload_file(&self, file: &ClientFile) -> Result<File, Error> {
        let upload = self.authenticated().await?;
        file.done
            .get_or_init(|| self.do_upload_file(&upload, file))
            .await
            .clone()
    }

    async fn do_upload_file(&self, upload: &Upload, file: &ClientFile) -> Result<File, Error> {
        let result = match file.take_source() {
            Some(source) => {
                let file_id = file.id();
                self.transport
                    .upload_file(upload, file_id.as_deref(), &file.name, source)
                    .await
            }
            None => Err(Error::Conflict("file has already been uploaded".to_string())),
        };

        match &result {
            Ok(info) => file.set_info(info.clone()),
            Err(e) => {
                warn!(upload_id = %upload.id, file = %file.name, error = %e, "file upload failed");
                file.set_error(e.clone());
            }
        }
        result
    }

    /// Create the upload then send every attached file concurrently.
    ///
    /// Returns `UploadFailed(n)` when `n` files failed, each one keeps its
    /// own error.
    pub async fn upload_all(self: &Arc<Self>) -> Result<(), Error> {
        self.create().await?;

        let mut tasks = JoinSet::new();
        for file in self.files() {
            let upload = Arc::clone(self);
            tasks.spawn(async move { upload.upload_file(&file).await });
        }

        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(_)) => failed += 1,
                Err(e) => {
                    warn!(error = %e, "file upload task failed");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(Error::UploadFailed(failed));
        }
        Ok(())
    }

    pub async fn download_file(&self, file: &ClientFile) -> Result<FileReader, Error> {
        let upload = self.authenticated().await?;
        let info = file.require_info()?;
        self.transport.download_file(&upload, &info).await
    }

    pub async fn delete_file(&self, file: &ClientFile) -> Result<File, Error> {
        let upload = self.authenticated().await?;
        let info = file.require_info()?;
        let removed = self.transport.remove_file(&upload, &info).await?;
        file.set_info(removed.clone());
        Ok(removed)
    }

    /// Remove the whole upload from the server.
    pub async fn delete(&self) -> Result<(), Error> {
        let upload = self.authenticated().await?;
        self.transport.remove_upload(&upload).await
    }
}

pub struct ClientFile {
    name: String,
    reference: String,
    source: Mutex<Option<Source>>,
    info: Mutex<Option<File>>,
    error: Mutex<Option<Error>>,
    done: OnceCell<Result<File, Error>>,
}

impl ClientFile {
    fn new(name: String, reference: String, source: Option<Source>) -> Self {
        Self {
            name,
            reference,
            source: Mutex::new(source),
            info: Mutex::new(None),
            error: Mutex::new(None),
            done: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Server-assigned id, known once the file is declared or uploaded.
    pub fn id(&self) -> Option<String> {
        lock(&self.info).as_ref().map(|f| f.id.clone())
    }

    pub fn info(&self) -> Option<File> {
        lock(&self.info).clone()
    }

    pub fn status(&self) -> FileStatus {
        lock(&self.info)
            .as_ref()
            .map(|f| f.status)
            .unwrap_or_default()
    }

    /// Why the upload of this file failed, if it did.
    pub fn error(&self) -> Option<Error> {
        lock(&self.error).clone()
    }

    pub fn has_been_uploaded(&self) -> bool {
        self.done.get().is_some_and(|result| result.is_ok())
    }

    fn set_info(&self, info: File) {
        *lock(&self.info) = Some(info);
    }

    fn set_error(&self, error: Error) {
        *lock(&self.error) = Some(error);
    }

    fn take_source(&self) -> Option<Source> {
        lock(&self.source).take()
    }

    fn require_info(&self) -> Result<File, Error> {
        self.info().ok_or_else(|| {
            Error::Invalid(format!("file {} is not known by the server yet", self.name))
        })
    }
}
