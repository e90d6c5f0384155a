use std::fmt::Display;

use thiserror::Error;

use crate::data::DataError;
use crate::metadata::DatabaseError;

/// Errors surfaced by the upload lifecycle.
///
/// Every variant carries a message meant for the caller, so that a failure
/// always says which record and which status were involved. The enum is
/// `Clone` because single-flight waiters all receive the same result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Expired(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    Unsupported(String),
    #[error("{0}")]
    Invalid(String),
    #[error("failed to upload {0} file(s), check each file status for more details")]
    UploadFailed(usize),
    #[error("backend error: {0}")]
    Backend(String),
}

impl Error {
    /// Wrap an engine-level failure, keeping its cause in the message.
    pub fn backend(context: &str, cause: impl Display) -> Self {
        Error::Backend(format!("{context}: {cause}"))
    }
}

impl From<DatabaseError> for Error {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Aborted(inner) => inner,
            other => Error::backend("metadata backend", other),
        }
    }
}

impl From<DataError> for Error {
    fn from(e: DataError) -> Self {
        match e {
            DataError::NotFound(msg) => Error::NotFound(msg),
            DataError::Unsupported(msg) => Error::Unsupported(msg),
            DataError::InvalidId(id) => Error::Invalid(format!("invalid identifier: {id}")),
            DataError::Io(e) => Error::backend("data backend", e),
        }
    }
}
