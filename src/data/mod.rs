mod file;
mod stream;

pub use file::FileBackend;
pub use stream::StreamBackend;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::models::{BackendDetails, File, Upload};

#[derive(Debug, Error)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unsupported(String),
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

/// Byte stream handed to downloaders.
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// Where file bytes live.
/// The bytes are meaningless without the metadata, a backend never decides
/// on its own whether a file may be read or removed.
#[async_trait]
pub trait DataBackend: Send + Sync {
    /// Consume `reader` into the store and return the locator to persist.
    async fn add_file(
        &self,
        upload: &Upload,
        file: &File,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<BackendDetails, DataError>;

    async fn get_file(&self, upload: &Upload, file_id: &str) -> Result<FileReader, DataError>;

    async fn remove_file(&self, upload: &Upload, file_id: &str) -> Result<(), DataError>;

    /// Bulk removal of everything stored for an upload.
    async fn remove_upload(&self, upload: &Upload) -> Result<(), DataError>;
}
