use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWriteExt};

use super::{DataBackend, DataError, FileReader};
use crate::models::{BackendDetails, File, Upload};

/// Local filesystem store, sharded as `<root>/<id[0..2]>/<upload_id>/<file_id>`.
pub struct FileBackend {
    base_path: PathBuf,
}

impl FileBackend {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, std::io::Error> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn upload_dir(&self, upload_id: &str) -> Result<PathBuf, DataError> {
        if upload_id.len() < 3 || !is_safe_id(upload_id) {
            return Err(DataError::InvalidId(upload_id.to_string()));
        }
        Ok(self.base_path.join(&upload_id[..2]).join(upload_id))
    }

    pub fn file_path(&self, upload_id: &str, file_id: &str) -> Result<PathBuf, DataError> {
        if !is_safe_id(file_id) {
            return Err(DataError::InvalidId(file_id.to_string()));
        }
        Ok(self.upload_dir(upload_id)?.join(file_id))
    }
}

fn is_safe_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

#[async_trait]
impl DataBackend for FileBackend {
    async fn add_file(
        &self,
        upload: &Upload,
        file: &File,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<BackendDetails, DataError> {
        let dir = self.upload_dir(&upload.id)?;
        let path = self.file_path(&upload.id, &file.id)?;
        tokio::fs::create_dir_all(&dir).await?;

        let mut out = tokio::fs::File::create(&path).await?;
        tokio::io::copy(reader, &mut out).await?;
        out.flush().await?;

        Ok(BackendDetails::File {
            path: path.to_string_lossy().into_owned(),
        })
    }

    async fn get_file(&self, upload: &Upload, file_id: &str) -> Result<FileReader, DataError> {
        let path = self.file_path(&upload.id, file_id)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(DataError::NotFound(format!(
                "file {}/{} not found in data backend",
                upload.id, file_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_file(&self, upload: &Upload, file_id: &str) -> Result<(), DataError> {
        let path = self.file_path(&upload.id, file_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        // The upload directory stays: a sibling may be writing into it.
        // remove_upload drops it with the upload.
        Ok(())
    }

    async fn remove_upload(&self, upload: &Upload) -> Result<(), DataError> {
        let dir = self.upload_dir(&upload.id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
