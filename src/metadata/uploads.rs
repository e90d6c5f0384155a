use chrono::{DateTime, Utc};
use redb::{ReadableTable, WriteTransaction};

use super::db::{Database, DatabaseError};
use super::tables::*;
use super::{check_immutable, keys, UploadTx, MISSING_UPLOAD_TX};
use crate::error::Error;
use crate::models::{decode_upload, ServerStats, Upload, UserStats};

impl Database {
    // ========================================================================
    // Upload operations
    // ========================================================================

    /// Store a new upload and its index entries
    pub fn put_upload(&self, upload: &Upload) -> Result<(), DatabaseError> {
        debug_assert!(!upload.id.is_empty(), "upload id must not be empty");

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(UPLOADS)?;
            if table.get(upload.id.as_str())?.is_some() {
                return Err(
                    Error::AlreadyExists(format!("upload {} already exists", upload.id)).into(),
                );
            }
            let data = serde_json::to_vec(upload)?;
            table.insert(upload.id.as_str(), data.as_slice())?;
        }
        index_upload(&write_txn, upload)?;
        write_txn.commit()?;
        Ok(())
    }

    /// Get an upload by id, decoding legacy records as well
    pub fn read_upload(&self, id: &str) -> Result<Option<Upload>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(UPLOADS)?;

        match table.get(id)? {
            Some(data) => Ok(Some(decode_upload(data.value())?)),
            None => Ok(None),
        }
    }

    /// Read-modify-write an upload inside a single write transaction
    pub fn modify_upload(&self, id: &str, tx: &mut UploadTx<'_>) -> Result<Upload, DatabaseError> {
        let write_txn = self.begin_write()?;

        let existing = {
            let table = write_txn.open_table(UPLOADS)?;
            let result = match table.get(id)? {
                Some(data) => Some(decode_upload(data.value())?),
                None => None,
            };
            result
        };

        let Some(before) = existing else {
            tx(None)?;
            return Err(Error::Backend(MISSING_UPLOAD_TX.to_string()).into());
        };

        let mut after = before.clone();
        tx(Some(&mut after))?;
        check_immutable(&before, &after)?;

        unindex_upload(&write_txn, &before)?;
        index_upload(&write_txn, &after)?;
        {
            let mut table = write_txn.open_table(UPLOADS)?;
            let data = serde_json::to_vec(&after)?;
            table.insert(id, data.as_slice())?;
        }

        write_txn.commit()?;
        Ok(after)
    }

    /// Delete an upload and its index entries, missing uploads are ignored
    pub fn delete_upload(&self, id: &str) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;

        let existing = {
            let table = write_txn.open_table(UPLOADS)?;
            let result = match table.get(id)? {
                Some(data) => Some(decode_upload(data.value())?),
                None => None,
            };
            result
        };

        if let Some(upload) = existing {
            unindex_upload(&write_txn, &upload)?;
            let mut table = write_txn.open_table(UPLOADS)?;
            table.remove(id)?;
        }

        write_txn.commit()?;
        Ok(())
    }

    /// Ids of uploads whose deadline is at or before `now`
    pub fn expired_uploads(&self, now: DateTime<Utc>) -> Result<Vec<String>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(UPLOAD_EXPIRY)?;
        let end = keys::expiry_upper_bound(now.timestamp());

        let mut ids = Vec::new();
        for entry in table.range::<&[u8]>(..end.as_slice())? {
            let (key, _) = entry?;
            if let Some(id) = keys::upload_id_from_expiry_key(key.value()) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    /// Ids of a user's uploads, newest first
    pub fn user_upload_ids(
        &self,
        user_id: &str,
        token: Option<&str>,
    ) -> Result<Vec<String>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USER_UPLOADS)?;

        let prefix = keys::user_prefix(user_id);
        let end = keys::prefix_successor(&prefix);
        let range = match &end {
            Some(end) => table.range::<&[u8]>(prefix.as_slice()..end.as_slice())?,
            None => table.range::<&[u8]>(prefix.as_slice()..)?,
        };

        let mut ids = Vec::new();
        for entry in range {
            let (key, value) = entry?;
            if token.is_some_and(|t| t != value.value()) {
                continue;
            }
            if let Some(id) = keys::upload_id_from_user_key(key.value(), prefix.len()) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    pub fn user_statistics(
        &self,
        user_id: &str,
        token: Option<&str>,
    ) -> Result<UserStats, DatabaseError> {
        let ids = self.user_upload_ids(user_id, token)?;

        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(UPLOADS)?;

        let mut stats = UserStats::default();
        for id in ids {
            if let Some(data) = table.get(id.as_str())? {
                stats.add_upload(&decode_upload(data.value())?);
            }
        }
        Ok(stats)
    }

    /// Aggregate statistics over every upload
    pub fn server_statistics(&self) -> Result<ServerStats, DatabaseError> {
        let read_txn = self.begin_read()?;

        let users = {
            let table = read_txn.open_table(USERS)?;
            let mut count = 0u64;
            for entry in table.iter()? {
                entry?;
                count += 1;
            }
            count
        };

        let table = read_txn.open_table(UPLOADS)?;
        let mut uploads = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            uploads.push(decode_upload(value.value())?);
        }

        Ok(ServerStats::collect(users, uploads))
    }
}

fn index_upload(write_txn: &WriteTransaction, upload: &Upload) -> Result<(), DatabaseError> {
    if let Some(deadline) = upload.expires_at() {
        let mut expiry = write_txn.open_table(UPLOAD_EXPIRY)?;
        let key = keys::expiry_key(deadline.timestamp(), &upload.id);
        expiry.insert(key.as_slice(), ())?;
    }

    if let Some(ref user_id) = upload.user {
        let mut by_user = write_txn.open_table(USER_UPLOADS)?;
        let key = keys::user_upload_key(user_id, upload.created_at.timestamp_micros(), &upload.id);
        let token = upload.token.as_deref().unwrap_or("");
        by_user.insert(key.as_slice(), token)?;
    }
    Ok(())
}

fn unindex_upload(write_txn: &WriteTransaction, upload: &Upload) -> Result<(), DatabaseError> {
    if let Some(deadline) = upload.expires_at() {
        let mut expiry = write_txn.open_table(UPLOAD_EXPIRY)?;
        let key = keys::expiry_key(deadline.timestamp(), &upload.id);
        expiry.remove(key.as_slice())?;
    }

    if let Some(ref user_id) = upload.user {
        let mut by_user = write_txn.open_table(USER_UPLOADS)?;
        let key = keys::user_upload_key(user_id, upload.created_at.timestamp_micros(), &upload.id);
        by_user.remove(key.as_slice())?;
    }
    Ok(())
}
