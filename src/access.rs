//! Who may do what on an upload.
//!
//! [`authorize`] turns the credentials a request carried into an
//! [`UploadAccess`]. The `check_*` functions then gate one request class
//! each and return the `Forbidden`/`Conflict` error to surface.

use base64::Engine;
use md5::{Digest, Md5};
use subtle::ConstantTimeEq;

use crate::config::UploadPolicy;
use crate::error::Error;
use crate::models::{File, FileStatus, Upload, User};
use crate::state_machine::not_available;

/// Credentials presented by whoever is calling.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub user: Option<User>,
    /// Set when the user authenticated with a bearer token rather than a session.
    pub token: Option<String>,
    pub upload_token: Option<String>,
    /// Base64 part of an `Authorization: Basic` header.
    pub basic_auth: Option<String>,
    pub yubikey_verified: bool,
    pub remote_ip: Option<String>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_token(mut self, user: User, token: impl Into<String>) -> Self {
        self.user = Some(user);
        self.token = Some(token.into());
        self
    }

    pub fn with_upload_token(mut self, upload_token: impl Into<String>) -> Self {
        self.upload_token = Some(upload_token.into());
        self
    }

    pub fn with_basic_auth(mut self, credentials: impl Into<String>) -> Self {
        self.basic_auth = Some(credentials.into());
        self
    }

    pub fn with_remote_ip(mut self, ip: impl Into<String>) -> Self {
        self.remote_ip = Some(ip.into());
        self
    }

    pub fn is_admin(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.is_admin)
    }

    /// Act as `target`. Only admins may do this, and the resulting caller
    /// holds the target's rights, not the admin's.
    pub fn impersonate(&self, target: User) -> Result<Caller, Error> {
        check_admin(self)?;
        Ok(Caller {
            user: Some(target),
            token: None,
            upload_token: self.upload_token.clone(),
            basic_auth: self.basic_auth.clone(),
            yubikey_verified: self.yubikey_verified,
            remote_ip: self.remote_ip.clone(),
        })
    }
}

/// Result of matching a caller against one upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadAccess {
    pub upload_admin: bool,
    pub credentials_ok: bool,
}

pub fn authorize(upload: &Upload, caller: &Caller) -> UploadAccess {
    UploadAccess {
        upload_admin: is_upload_admin(upload, caller),
        credentials_ok: credentials_ok(upload, caller),
    }
}

fn secrets_match(given: &str, expected: &str) -> bool {
    given.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn is_upload_admin(upload: &Upload, caller: &Caller) -> bool {
    if let (Some(given), Some(expected)) = (&caller.upload_token, &upload.upload_token) {
        if secrets_match(given, expected) {
            return true;
        }
    }

    let Some(user) = &caller.user else {
        return false;
    };
    match &caller.token {
        // A token only manages the uploads it created, whoever owns it
        Some(token) => upload.token.as_deref() == Some(token.as_str()),
        None => user.is_admin || upload.user.as_deref() == Some(user.id.as_str()),
    }
}

fn credentials_ok(upload: &Upload, caller: &Caller) -> bool {
    if upload.protected_by_password {
        let (Some(given), Some(expected)) = (&caller.basic_auth, &upload.password) else {
            return false;
        };
        let digest = hex::encode(Md5::digest(given.as_bytes()));
        if !secrets_match(&digest, expected) {
            return false;
        }
    }
    if upload.protected_by_yubikey && !caller.yubikey_verified {
        return false;
    }
    true
}

/// The view of `upload` a caller is allowed to see. Only upload admins get
/// the upload token back.
pub fn present(upload: &Upload, access: UploadAccess) -> Upload {
    let mut shown = upload.sanitized();
    if access.upload_admin {
        shown.upload_token = upload.upload_token.clone();
    }
    shown
}

/// What a password-protected upload stores: the MD5 of the Basic auth payload.
pub fn hash_credentials(login: &str, password: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{login}:{password}"));
    hex::encode(Md5::digest(encoded.as_bytes()))
}

/// Protected uploads need either ownership or matching credentials.
pub fn check_credentials(upload: &Upload, access: UploadAccess) -> Result<(), Error> {
    if access.upload_admin || access.credentials_ok {
        return Ok(());
    }
    tracing::debug!(upload_id = %upload.id, "rejected credentials");
    Err(Error::Forbidden(
        "please provide valid credentials to access this upload".to_string(),
    ))
}

pub fn check_add_file(
    upload: &Upload,
    access: UploadAccess,
    policy: &UploadPolicy,
) -> Result<(), Error> {
    let anonymous_contribution = policy.anonymous_contributions && upload.user.is_none();
    if access.upload_admin || anonymous_contribution {
        return Ok(());
    }
    Err(Error::Forbidden(
        "you are not allowed to add files to this upload".to_string(),
    ))
}

pub fn check_remove_file(upload: &Upload, access: UploadAccess) -> Result<(), Error> {
    if access.upload_admin || upload.removable {
        return Ok(());
    }
    Err(Error::Forbidden(
        "you are not allowed to remove files from this upload".to_string(),
    ))
}

pub fn check_remove_upload(upload: &Upload, access: UploadAccess) -> Result<(), Error> {
    if access.upload_admin || upload.removable {
        return Ok(());
    }
    Err(Error::Forbidden(
        "you are not allowed to remove this upload".to_string(),
    ))
}

/// Status a file must be in to be served: stream relays are read while the
/// uploader is still writing.
pub fn downloadable_status(upload: &Upload) -> FileStatus {
    if upload.stream {
        FileStatus::Uploading
    } else {
        FileStatus::Uploaded
    }
}

pub fn check_download(upload: &Upload, file: &File, access: UploadAccess) -> Result<(), Error> {
    check_credentials(upload, access)?;
    if file.status != downloadable_status(upload) {
        return Err(Error::Conflict(not_available(file)));
    }
    Ok(())
}

/// Resolve which user's uploads a listing covers and with which token filter.
pub fn check_list(caller: &Caller, token: Option<&str>) -> Result<(String, Option<String>), Error> {
    let user = check_user(caller)?;

    match (&caller.token, token) {
        (Some(own), Some(filter)) if own != filter => Err(Error::Forbidden(
            "a token can only list its own uploads".to_string(),
        )),
        (Some(own), _) => Ok((user.id.clone(), Some(own.clone()))),
        (None, Some(filter)) => {
            if user.token(filter).is_none() {
                return Err(Error::Forbidden(format!(
                    "token {filter} does not belong to you"
                )));
            }
            Ok((user.id.clone(), Some(filter.to_string())))
        }
        (None, None) => Ok((user.id.clone(), None)),
    }
}

/// The authenticated user behind `caller`.
pub fn check_user(caller: &Caller) -> Result<&User, Error> {
    caller
        .user
        .as_ref()
        .ok_or_else(|| Error::Forbidden("you need to be authenticated".to_string()))
}

pub fn check_admin(caller: &Caller) -> Result<(), Error> {
    if caller.is_admin() {
        return Ok(());
    }
    Err(Error::Forbidden("you need administrator privileges".to_string()))
}
