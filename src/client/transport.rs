use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncRead;

use crate::access::{authorize, check_credentials, present, Caller, UploadAccess};
use crate::data::FileReader;
use crate::error::Error;
use crate::manager::{FileTarget, UploadManager};
use crate::models::{File, Upload, UploadParams};

/// Bytes a client sends for one file.
pub type Source = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// How a client reaches a server.
///
/// Every call that targets an existing upload authenticates with the
/// `upload_token` carried by the `Upload` it is given, when there is one.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn create_upload(&self, params: &UploadParams) -> Result<Upload, Error>;

    async fn get_upload(&self, id: &str, upload_token: Option<&str>) -> Result<Upload, Error>;

    /// Send the bytes of a declared file (`file_id`) or of a new one.
    async fn upload_file(
        &self,
        upload: &Upload,
        file_id: Option<&str>,
        name: &str,
        source: Source,
    ) -> Result<File, Error>;

    async fn download_file(&self, upload: &Upload, file: &File) -> Result<FileReader, Error>;

    async fn remove_file(&self, upload: &Upload, file: &File) -> Result<File, Error>;

    async fn remove_upload(&self, upload: &Upload) -> Result<(), Error>;
}

/// In-process transport calling an [`UploadManager`] directly.
pub struct LocalTransport {
    manager: Arc<UploadManager>,
    caller: Caller,
}

impl LocalTransport {
    pub fn new(manager: Arc<UploadManager>) -> Self {
        Self::with_caller(manager, Caller::anonymous())
    }

    pub fn with_caller(manager: Arc<UploadManager>, caller: Caller) -> Self {
        Self { manager, caller }
    }

    /// Re-read the upload and match the caller against it.
    fn open(&self, id: &str, upload_token: Option<&str>) -> Result<(Upload, UploadAccess), Error> {
        let stored = self.manager.get_upload(id)?;
        let mut caller = self.caller.clone();
        caller.upload_token = upload_token.map(str::to_string);
        let access = authorize(&stored, &caller);
        Ok((stored, access))
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn create_upload(&self, params: &UploadParams) -> Result<Upload, Error> {
        let upload = self.manager.create_upload(&self.caller, params.clone())?;
        Ok(present(
            &upload,
            UploadAccess {
                upload_admin: true,
                credentials_ok: true,
            },
        ))
    }

    async fn get_upload(&self, id: &str, upload_token: Option<&str>) -> Result<Upload, Error> {
        let (stored, access) = self.open(id, upload_token)?;
        check_credentials(&stored, access)?;
        Ok(present(&stored, access))
    }

    async fn upload_file(
        &self,
        upload: &Upload,
        file_id: Option<&str>,
        name: &str,
        mut source: Source,
    ) -> Result<File, Error> {
        let (stored, access) = self.open(&upload.id, upload.upload_token.as_deref())?;
        let target = match file_id {
            Some(id) => FileTarget::Declared(id),
            None => FileTarget::New(name),
        };
        let mut file = self
            .manager
            .add_file(&stored, access, target, &mut source)
            .await?;
        file.sanitize();
        Ok(file)
    }

    async fn download_file(&self, upload: &Upload, file: &File) -> Result<FileReader, Error> {
        let (stored, access) = self.open(&upload.id, upload.upload_token.as_deref())?;
        let download = self.manager.get_file(&stored, access, &file.id).await?;
        Ok(download.reader)
    }

    async fn remove_file(&self, upload: &Upload, file: &File) -> Result<File, Error> {
        let (stored, access) = self.open(&upload.id, upload.upload_token.as_deref())?;
        let mut removed = self.manager.remove_file(&stored, access, &file.id).await?;
        removed.sanitize();
        Ok(removed)
    }

    async fn remove_upload(&self, upload: &Upload) -> Result<(), Error> {
        let (stored, access) = self.open(&upload.id, upload.upload_token.as_deref())?;
        self.manager.delete_upload(&stored, access).await
    }
}
