use chrono::{DateTime, Utc};
use redb::{Database as RedbDatabase, ReadTransaction, WriteTransaction};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::tables::*;
use super::{MetadataBackend, UploadTx, UserTx};
use crate::error::Error;
use crate::models::{ServerStats, Upload, User, UserStats};

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A mutator refused the update, its error is returned unchanged.
    #[error("{0}")]
    Aborted(Error),
    #[error("Commit error: {0}")]
    Commit(Box<redb::CommitError>),
    #[error("Database error: {0}")]
    Redb(Box<redb::Error>),
    #[error("Database error: {0}")]
    RedbDatabase(Box<redb::DatabaseError>),
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),
    #[error("Storage error: {0}")]
    Storage(Box<redb::StorageError>),
    #[error("Table error: {0}")]
    Table(Box<redb::TableError>),
    #[error("Transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
}

impl From<redb::CommitError> for DatabaseError {
    fn from(e: redb::CommitError) -> Self {
        DatabaseError::Commit(Box::new(e))
    }
}

impl From<redb::DatabaseError> for DatabaseError {
    fn from(e: redb::DatabaseError) -> Self {
        DatabaseError::RedbDatabase(Box::new(e))
    }
}

impl From<redb::Error> for DatabaseError {
    fn from(e: redb::Error) -> Self {
        DatabaseError::Redb(Box::new(e))
    }
}

impl From<redb::StorageError> for DatabaseError {
    fn from(e: redb::StorageError) -> Self {
        DatabaseError::Storage(Box::new(e))
    }
}

impl From<redb::TableError> for DatabaseError {
    fn from(e: redb::TableError) -> Self {
        DatabaseError::Table(Box::new(e))
    }
}

impl From<redb::TransactionError> for DatabaseError {
    fn from(e: redb::TransactionError) -> Self {
        DatabaseError::Transaction(Box::new(e))
    }
}

impl From<Error> for DatabaseError {
    fn from(e: Error) -> Self {
        DatabaseError::Aborted(e)
    }
}

/// redb-backed metadata engine.
///
/// redb runs one write transaction at a time, which makes every
/// read-modify-write below atomic per record.
pub struct Database {
    db: Arc<RedbDatabase>,
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
        }
    }
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("file-drop.redb");
        let db = Arc::new(RedbDatabase::create(db_path)?);

        // Initialize application tables
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(UPLOADS)?;
            let _ = write_txn.open_table(UPLOAD_EXPIRY)?;
            let _ = write_txn.open_table(USER_UPLOADS)?;
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USER_TOKENS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> Result<ReadTransaction, DatabaseError> {
        Ok(self.db.begin_read()?)
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> Result<WriteTransaction, DatabaseError> {
        Ok(self.db.begin_write()?)
    }
}

impl MetadataBackend for Database {
    fn create_upload(&self, upload: &Upload) -> Result<(), Error> {
        Ok(self.put_upload(upload)?)
    }

    fn get_upload(&self, id: &str) -> Result<Option<Upload>, Error> {
        Ok(self.read_upload(id)?)
    }

    fn update_upload(&self, id: &str, tx: &mut UploadTx<'_>) -> Result<Upload, Error> {
        Ok(self.modify_upload(id, tx)?)
    }

    fn remove_upload(&self, id: &str) -> Result<(), Error> {
        Ok(self.delete_upload(id)?)
    }

    fn get_uploads_to_remove(&self, now: DateTime<Utc>) -> Result<Vec<String>, Error> {
        Ok(self.expired_uploads(now)?)
    }

    fn get_user_uploads(&self, user_id: &str, token: Option<&str>) -> Result<Vec<String>, Error> {
        Ok(self.user_upload_ids(user_id, token)?)
    }

    fn get_server_statistics(&self) -> Result<ServerStats, Error> {
        Ok(self.server_statistics()?)
    }

    fn get_user_statistics(
        &self,
        user_id: &str,
        token: Option<&str>,
    ) -> Result<UserStats, Error> {
        Ok(self.user_statistics(user_id, token)?)
    }

    fn create_user(&self, user: &User) -> Result<(), Error> {
        Ok(self.put_user(user)?)
    }

    fn get_user(&self, id: &str) -> Result<Option<User>, Error> {
        Ok(self.read_user(id)?)
    }

    fn get_user_from_token(&self, token: &str) -> Result<Option<User>, Error> {
        Ok(self.user_by_token(token)?)
    }

    fn update_user(&self, id: &str, tx: &mut UserTx<'_>) -> Result<User, Error> {
        Ok(self.modify_user(id, tx)?)
    }

    fn remove_user(&self, id: &str) -> Result<(), Error> {
        Ok(self.delete_user(id)?)
    }

    fn get_users(&self) -> Result<Vec<String>, Error> {
        Ok(self.user_ids()?)
    }
}
