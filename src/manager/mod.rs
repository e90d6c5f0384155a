//! Server side of the upload lifecycle.
//!
//! [`UploadManager`] owns no state of its own: every decision about a file is
//! taken inside a metadata update, and the data backends only move bytes.

mod files;
mod preprocess;
mod users;

pub use files::{Download, FileTarget};
pub use preprocess::Preprocessor;

use std::sync::Arc;

use crate::access::{check_admin, check_list, hash_credentials, Caller};
use crate::config::UploadPolicy;
use crate::data::DataBackend;
use crate::error::Error;
use crate::metadata::MetadataBackend;
use crate::models::{
    random_id, File, ServerStats, Upload, UploadParams, UserStats, FILE_ID_LENGTH,
};

/// Longest accepted file name, in characters.
pub const MAX_FILE_NAME_LENGTH: usize = 1024;

const DEFAULT_LOGIN: &str = "user";

pub struct UploadManager {
    metadata: Arc<dyn MetadataBackend>,
    data: Arc<dyn DataBackend>,
    stream: Option<Arc<dyn DataBackend>>,
    policy: UploadPolicy,
}

impl UploadManager {
    pub fn new(
        metadata: Arc<dyn MetadataBackend>,
        data: Arc<dyn DataBackend>,
        stream: Option<Arc<dyn DataBackend>>,
        policy: UploadPolicy,
    ) -> Self {
        Self {
            metadata,
            data,
            stream,
            policy,
        }
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataBackend> {
        &self.metadata
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Data backend holding the bytes of `upload`.
    pub fn backend_for(&self, upload: &Upload) -> Result<&Arc<dyn DataBackend>, Error> {
        if !upload.stream {
            return Ok(&self.data);
        }
        self.stream
            .as_ref()
            .ok_or_else(|| Error::Unsupported("stream mode is disabled".to_string()))
    }

    /// Validate `params` against the policy and store the new upload.
    ///
    /// The returned record still carries its upload token, callers sanitize
    /// it before handing it to anyone but the creator.
    pub fn create_upload(&self, caller: &Caller, params: UploadParams) -> Result<Upload, Error> {
        let policy = &self.policy;

        if caller.user.is_none() && policy.no_anonymous_uploads {
            return Err(Error::Forbidden(
                "anonymous uploads are disabled, please authenticate first".to_string(),
            ));
        }
        if params.stream && (!policy.stream || self.stream.is_none()) {
            return Err(Error::Forbidden("stream mode is not enabled".to_string()));
        }
        if params.one_shot && !policy.one_shot {
            return Err(Error::Forbidden(
                "one shot downloads are not enabled".to_string(),
            ));
        }
        if params.removable && !policy.removable {
            return Err(Error::Forbidden(
                "removable uploads are not enabled".to_string(),
            ));
        }
        if params.password.is_some() && !policy.password {
            return Err(Error::Forbidden(
                "password protection is not enabled".to_string(),
            ));
        }
        if params.yubikey.is_some() {
            return Err(Error::Forbidden(
                "yubikey are disabled on this server".to_string(),
            ));
        }
        if params.files.len() > policy.max_files_per_upload {
            return Err(Error::Invalid(format!(
                "too many files. maximum is {}",
                policy.max_files_per_upload
            )));
        }
        for file in &params.files {
            check_file_name(&file.name)?;
        }

        let ttl = self.resolve_ttl(params.ttl)?;
        let mut upload = Upload::new(ttl);
        upload.comments = params.comments;
        upload.stream = params.stream;
        upload.one_shot = params.one_shot || params.stream;
        upload.removable = params.removable;
        upload.remote_ip = caller.remote_ip.clone();

        if let Some(user) = &caller.user {
            upload.user = Some(user.id.clone());
            upload.token = caller.token.clone();
            upload.admin = user.is_admin;
        }

        if let Some(password) = params.password {
            let login = params
                .login
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| DEFAULT_LOGIN.to_string());
            upload.protected_by_password = true;
            upload.password = Some(hash_credentials(&login, &password));
            upload.login = Some(login);
        }

        for declared in params.files {
            let mut file = File::new(random_id(FILE_ID_LENGTH), declared.name);
            file.reference = declared.reference;
            upload.files.push(file);
        }

        self.metadata.create_upload(&upload)?;
        tracing::info!(
            upload_id = %upload.id,
            files = upload.files.len(),
            ttl = upload.ttl,
            stream = upload.stream,
            "upload created"
        );
        Ok(upload)
    }

    fn resolve_ttl(&self, requested: Option<u64>) -> Result<u64, Error> {
        let max_ttl = self.policy.max_ttl;
        match requested {
            None => Ok(self.policy.default_ttl),
            Some(0) if max_ttl != 0 => Err(Error::Invalid(format!(
                "cannot set infinite ttl (maximum allowed is : {max_ttl})"
            ))),
            Some(ttl) if max_ttl != 0 && ttl > max_ttl => Err(Error::Invalid(format!(
                "invalid ttl. (maximum allowed is : {max_ttl})"
            ))),
            Some(ttl) => Ok(ttl),
        }
    }

    /// Fetch a live upload.
    pub fn get_upload(&self, id: &str) -> Result<Upload, Error> {
        let upload = self
            .metadata
            .get_upload(id)?
            .ok_or_else(|| upload_not_found(id))?;
        if upload.is_expired() {
            return Err(Error::Expired(format!("upload {id} has expired")));
        }
        Ok(upload)
    }

    /// The caller's live uploads, newest first.
    pub fn user_uploads(&self, caller: &Caller, token: Option<&str>) -> Result<Vec<Upload>, Error> {
        let (user_id, token) = check_list(caller, token)?;
        let ids = self.metadata.get_user_uploads(&user_id, token.as_deref())?;

        let mut uploads = Vec::with_capacity(ids.len());
        for id in ids {
            // Removed between the index scan and the read
            if let Some(upload) = self.metadata.get_upload(&id)? {
                if !upload.is_expired() {
                    uploads.push(upload);
                }
            }
        }
        Ok(uploads)
    }

    pub fn user_statistics(&self, caller: &Caller, token: Option<&str>) -> Result<UserStats, Error> {
        let (user_id, token) = check_list(caller, token)?;
        self.metadata.get_user_statistics(&user_id, token.as_deref())
    }

    pub fn server_statistics(&self, caller: &Caller) -> Result<ServerStats, Error> {
        check_admin(caller)?;
        self.metadata.get_server_statistics()
    }
}

pub(crate) fn upload_not_found(id: &str) -> Error {
    Error::NotFound(format!("upload {id} not found"))
}

pub(crate) fn check_file_name(name: &str) -> Result<(), Error> {
    let length = name.chars().count();
    if length == 0 {
        return Err(Error::Invalid("missing file name".to_string()));
    }
    if length > MAX_FILE_NAME_LENGTH {
        return Err(Error::Invalid(format!(
            "file name is too long, maximum is {MAX_FILE_NAME_LENGTH} characters"
        )));
    }
    Ok(())
}
