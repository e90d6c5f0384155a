//! File status state machine.
//!
//! Every function here mutates a `File` in place and is meant to run inside a
//! metadata mutator, so the check and the write happen in one atomic update.
//!
//! ```text
//! missing ──claim──▶ uploading ──complete──▶ uploaded ──remove/consume──▶ removed
//!    ▲                   │                        │
//!    └────rollback───────┤                        └──────────────────────▶ deleted
//!                        ▼
//! missing ─────────▶ deleted
//! ```

use chrono::Utc;

use crate::error::Error;
use crate::models::{BackendDetails, File, FileStatus};

impl FileStatus {
    /// Whether `self → next` is a legal edge.
    pub fn can_transition_to(self, next: FileStatus) -> bool {
        use FileStatus::*;
        matches!(
            (self, next),
            (Missing, Uploading)
                | (Missing, Deleted)
                | (Uploading, Uploaded)
                | (Uploading, Missing)
                | (Uploading, Deleted)
                | (Uploaded, Removed)
                | (Uploaded, Deleted)
        )
    }
}

/// What a finished write recorded about the bytes.
#[derive(Debug, Clone)]
pub struct Completion {
    pub size: u64,
    pub md5: String,
    pub mime_type: String,
    pub details: BackendDetails,
}

/// Message used whenever a file is not in the status an operation needs.
pub fn not_available(file: &File) -> String {
    format!(
        "file {} ({}) is not available: {}",
        file.name, file.id, file.status
    )
}

/// Move `file` to `next`, returning the previous status.
pub fn transition(file: &mut File, next: FileStatus) -> Result<FileStatus, Error> {
    let previous = file.status;
    if !previous.can_transition_to(next) {
        return Err(Error::Conflict(format!(
            "file {} ({}) cannot go from {} to {}",
            file.name, file.id, previous, next
        )));
    }
    file.status = next;
    Ok(previous)
}

/// Take the single writer slot of a `missing` file.
pub fn claim_upload(file: &mut File) -> Result<(), Error> {
    if file.status != FileStatus::Missing {
        return Err(Error::Conflict(not_available(file)));
    }
    transition(file, FileStatus::Uploading)?;
    Ok(())
}

/// Commit a finished write.
pub fn complete_upload(file: &mut File, completion: Completion) -> Result<(), Error> {
    if file.status != FileStatus::Uploading {
        return Err(Error::Conflict(not_available(file)));
    }
    transition(file, FileStatus::Uploaded)?;
    file.size = completion.size;
    file.md5 = Some(completion.md5);
    file.mime_type = Some(completion.mime_type);
    file.backend_details = Some(completion.details);
    file.uploaded_at = Some(Utc::now());
    Ok(())
}

/// Release the writer slot after a failed write so the file can be uploaded again.
pub fn rollback_upload(file: &mut File) -> Result<(), Error> {
    transition(file, FileStatus::Missing)?;
    file.size = 0;
    file.md5 = None;
    file.backend_details = None;
    Ok(())
}

/// Mark a one-shot file as downloaded.
pub fn consume(file: &mut File) -> Result<(), Error> {
    if file.status != FileStatus::Uploaded {
        return Err(Error::Conflict(not_available(file)));
    }
    transition(file, FileStatus::Removed)?;
    Ok(())
}

/// Retire a file. Returns the previous status, bytes only need deleting when
/// it was `uploaded`.
pub fn remove(file: &mut File) -> Result<FileStatus, Error> {
    match file.status {
        FileStatus::Uploaded => transition(file, FileStatus::Removed),
        FileStatus::Missing | FileStatus::Uploading => transition(file, FileStatus::Deleted),
        FileStatus::Removed | FileStatus::Deleted => Err(Error::Conflict(format!(
            "file {} ({}) has already been removed",
            file.name, file.id
        ))),
    }
}
