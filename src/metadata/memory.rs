use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use super::{check_immutable, keys, MetadataBackend, UploadTx, UserTx};
use super::{MISSING_UPLOAD_TX, MISSING_USER_TX};
use crate::error::Error;
use crate::models::{ServerStats, Upload, User, UserStats};

/// In-process metadata engine.
///
/// Records live behind one mutex, so every operation is atomic. Indexes use
/// the same byte keys as the redb engine, which keeps ordering identical.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    uploads: HashMap<String, Upload>,
    expiry: BTreeSet<Vec<u8>>,
    by_user: BTreeMap<Vec<u8>, String>,
    users: HashMap<String, User>,
    tokens: HashMap<String, String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every write completes before the guard drops, a poisoned lock still
        // holds consistent data.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn index_upload(&mut self, upload: &Upload) {
        if let Some(deadline) = upload.expires_at() {
            self.expiry
                .insert(keys::expiry_key(deadline.timestamp(), &upload.id));
        }
        if let Some(ref user_id) = upload.user {
            let key =
                keys::user_upload_key(user_id, upload.created_at.timestamp_micros(), &upload.id);
            self.by_user
                .insert(key, upload.token.clone().unwrap_or_default());
        }
    }

    fn unindex_upload(&mut self, upload: &Upload) {
        if let Some(deadline) = upload.expires_at() {
            self.expiry
                .remove(&keys::expiry_key(deadline.timestamp(), &upload.id));
        }
        if let Some(ref user_id) = upload.user {
            let key =
                keys::user_upload_key(user_id, upload.created_at.timestamp_micros(), &upload.id);
            self.by_user.remove(&key);
        }
    }

    fn user_upload_ids(&self, user_id: &str, token: Option<&str>) -> Vec<String> {
        let prefix = keys::user_prefix(user_id);
        self.by_user
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(_, owner_token)| token.map_or(true, |t| t == owner_token.as_str()))
            .filter_map(|(key, _)| keys::upload_id_from_user_key(key, prefix.len()))
            .map(str::to_string)
            .collect()
    }

    fn register_tokens(&mut self, user_id: &str, tokens: &[&str]) -> Result<(), Error> {
        for token in tokens {
            if self
                .tokens
                .get(*token)
                .is_some_and(|owner| owner != user_id)
            {
                return Err(Error::Conflict(format!("token {token} is already in use")));
            }
        }
        for token in tokens {
            self.tokens.insert(token.to_string(), user_id.to_string());
        }
        Ok(())
    }
}

impl MetadataBackend for MemoryBackend {
    fn create_upload(&self, upload: &Upload) -> Result<(), Error> {
        let mut inner = self.lock();
        if inner.uploads.contains_key(&upload.id) {
            return Err(Error::AlreadyExists(format!(
                "upload {} already exists",
                upload.id
            )));
        }
        inner.index_upload(upload);
        inner.uploads.insert(upload.id.clone(), upload.clone());
        Ok(())
    }

    fn get_upload(&self, id: &str) -> Result<Option<Upload>, Error> {
        Ok(self.lock().uploads.get(id).cloned())
    }

    fn update_upload(&self, id: &str, tx: &mut UploadTx<'_>) -> Result<Upload, Error> {
        let mut inner = self.lock();
        let Some(before) = inner.uploads.get(id).cloned() else {
            tx(None)?;
            return Err(Error::Backend(MISSING_UPLOAD_TX.to_string()));
        };

        let mut after = before.clone();
        tx(Some(&mut after))?;
        check_immutable(&before, &after)?;

        inner.unindex_upload(&before);
        inner.index_upload(&after);
        inner.uploads.insert(id.to_string(), after.clone());
        Ok(after)
    }

    fn remove_upload(&self, id: &str) -> Result<(), Error> {
        let mut inner = self.lock();
        if let Some(upload) = inner.uploads.remove(id) {
            inner.unindex_upload(&upload);
        }
        Ok(())
    }

    fn get_uploads_to_remove(&self, now: DateTime<Utc>) -> Result<Vec<String>, Error> {
        let inner = self.lock();
        let end = keys::expiry_upper_bound(now.timestamp());
        Ok(inner
            .expiry
            .range(..end)
            .filter_map(|key| keys::upload_id_from_expiry_key(key))
            .map(str::to_string)
            .collect())
    }

    fn get_user_uploads(&self, user_id: &str, token: Option<&str>) -> Result<Vec<String>, Error> {
        Ok(self.lock().user_upload_ids(user_id, token))
    }

    fn get_server_statistics(&self) -> Result<ServerStats, Error> {
        let inner = self.lock();
        Ok(ServerStats::collect(
            inner.users.len() as u64,
            inner.uploads.values().cloned(),
        ))
    }

    fn get_user_statistics(
        &self,
        user_id: &str,
        token: Option<&str>,
    ) -> Result<UserStats, Error> {
        let inner = self.lock();
        let mut stats = UserStats::default();
        for id in inner.user_upload_ids(user_id, token) {
            if let Some(upload) = inner.uploads.get(&id) {
                stats.add_upload(upload);
            }
        }
        Ok(stats)
    }

    fn create_user(&self, user: &User) -> Result<(), Error> {
        let mut inner = self.lock();
        if inner.users.contains_key(&user.id) {
            return Err(Error::AlreadyExists(format!(
                "user {} already exists",
                user.id
            )));
        }
        let tokens: Vec<&str> = user.tokens.iter().map(|t| t.token.as_str()).collect();
        inner.register_tokens(&user.id, &tokens)?;
        inner.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    fn get_user(&self, id: &str) -> Result<Option<User>, Error> {
        Ok(self.lock().users.get(id).cloned())
    }

    fn get_user_from_token(&self, token: &str) -> Result<Option<User>, Error> {
        let inner = self.lock();
        Ok(inner
            .tokens
            .get(token)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    fn update_user(&self, id: &str, tx: &mut UserTx<'_>) -> Result<User, Error> {
        let mut inner = self.lock();
        let Some(before) = inner.users.get(id).cloned() else {
            tx(None)?;
            return Err(Error::Backend(MISSING_USER_TX.to_string()));
        };

        let mut after = before.clone();
        tx(Some(&mut after))?;
        if after.id != before.id {
            return Err(Error::Conflict(format!("user {} id is immutable", before.id)));
        }

        let old: HashSet<&str> = before.tokens.iter().map(|t| t.token.as_str()).collect();
        let new: HashSet<&str> = after.tokens.iter().map(|t| t.token.as_str()).collect();
        let added: Vec<&str> = new.difference(&old).copied().collect();
        inner.register_tokens(id, &added)?;
        for token in old.difference(&new) {
            inner.tokens.remove(*token);
        }

        inner.users.insert(id.to_string(), after.clone());
        Ok(after)
    }

    fn remove_user(&self, id: &str) -> Result<(), Error> {
        let mut inner = self.lock();
        if let Some(user) = inner.users.remove(id) {
            for token in &user.tokens {
                inner.tokens.remove(&token.token);
            }
        }
        Ok(())
    }

    fn get_users(&self) -> Result<Vec<String>, Error> {
        let mut ids: Vec<String> = self.lock().users.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
