//! Durable records for uploads and users.
//!
//! Two engines implement [`MetadataBackend`]:
//! - [`Database`]: redb, with binary-sortable index keys
//! - [`MemoryBackend`]: in-process maps with ordered indexes
//!
//! Both guarantee that [`MetadataBackend::update_upload`] is an atomic
//! read-modify-write per record, which is the only coordination point
//! between concurrent writers.

pub mod db;
pub mod keys;
mod memory;
mod tables;
mod uploads;
mod users;

pub use db::{Database, DatabaseError};
pub use memory::MemoryBackend;

use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::models::{ServerStats, Upload, User, UserStats};

/// Mutator applied to an upload inside an atomic update.
///
/// It receives `None` when the record does not exist and must then return an
/// error. Returning an error aborts the update and is passed through as is.
pub type UploadTx<'a> = dyn FnMut(Option<&mut Upload>) -> Result<(), Error> + 'a;

/// Mutator applied to a user inside an atomic update, same contract as [`UploadTx`].
pub type UserTx<'a> = dyn FnMut(Option<&mut User>) -> Result<(), Error> + 'a;

pub(crate) const MISSING_UPLOAD_TX: &str = "upload tx without upload should return an error";
pub(crate) const MISSING_USER_TX: &str = "user tx without user should return an error";

pub trait MetadataBackend: Send + Sync {
    /// Store a new upload. Fails with `AlreadyExists` on an id collision.
    fn create_upload(&self, upload: &Upload) -> Result<(), Error>;

    /// `Ok(None)` means the upload does not exist.
    fn get_upload(&self, id: &str) -> Result<Option<Upload>, Error>;

    /// Atomically apply `tx` to the stored upload and return the new record.
    fn update_upload(&self, id: &str, tx: &mut UploadTx<'_>) -> Result<Upload, Error>;

    /// Delete an upload and its index entries. Deleting a missing upload is a no-op.
    fn remove_upload(&self, id: &str) -> Result<(), Error>;

    /// Ids of uploads whose TTL elapsed at `now`.
    fn get_uploads_to_remove(&self, now: DateTime<Utc>) -> Result<Vec<String>, Error>;

    /// Ids of a user's uploads, newest first, optionally limited to one token.
    fn get_user_uploads(&self, user_id: &str, token: Option<&str>) -> Result<Vec<String>, Error>;

    fn get_server_statistics(&self) -> Result<ServerStats, Error>;

    fn get_user_statistics(&self, user_id: &str, token: Option<&str>)
        -> Result<UserStats, Error>;

    fn create_user(&self, user: &User) -> Result<(), Error>;

    fn get_user(&self, id: &str) -> Result<Option<User>, Error>;

    /// Resolve a bearer token to its owner.
    fn get_user_from_token(&self, token: &str) -> Result<Option<User>, Error>;

    fn update_user(&self, id: &str, tx: &mut UserTx<'_>) -> Result<User, Error>;

    fn remove_user(&self, id: &str) -> Result<(), Error>;

    fn get_users(&self) -> Result<Vec<String>, Error>;
}

/// Reject updates that rewrite identity fields.
pub(crate) fn check_immutable(before: &Upload, after: &Upload) -> Result<(), Error> {
    if before.id != after.id || before.upload_token != after.upload_token {
        return Err(Error::Conflict(format!(
            "upload {} id and upload token are immutable",
            before.id
        )));
    }
    Ok(())
}
