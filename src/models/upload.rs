use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::file::File;
use super::{random_id, UPLOAD_ID_LENGTH, UPLOAD_TOKEN_LENGTH};

/// TTLs beyond this are treated as never expiring.
const TTL_CEILING: u64 = 1 << 40;

/// One sharing session and the files it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Seconds until expiration, `0` never expires.
    #[serde(default)]
    pub ttl: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Whether the creator was an admin when the upload was created.
    /// Informational only, access checks look at the caller.
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub one_shot: bool,
    #[serde(default)]
    pub removable: bool,
    #[serde(default)]
    pub protected_by_password: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub protected_by_yubikey: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yubikey: Option<String>,
    pub files: Vec<File>,
}

impl Upload {
    /// A fresh upload with a new id and upload token.
    pub fn new(ttl: u64) -> Self {
        Self {
            id: random_id(UPLOAD_ID_LENGTH),
            created_at: Utc::now(),
            ttl,
            comments: None,
            remote_ip: None,
            upload_token: Some(random_id(UPLOAD_TOKEN_LENGTH)),
            user: None,
            token: None,
            admin: false,
            stream: false,
            one_shot: false,
            removable: false,
            protected_by_password: false,
            login: None,
            password: None,
            protected_by_yubikey: false,
            yubikey: None,
            files: Vec::new(),
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.ttl == 0 {
            return None;
        }
        let ttl = self.ttl.min(TTL_CEILING) as i64;
        self.created_at.checked_add_signed(Duration::seconds(ttl))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|deadline| now >= deadline)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn file(&self, id: &str) -> Option<&File> {
        self.files.iter().find(|f| f.id == id)
    }

    pub fn file_mut(&mut self, id: &str) -> Option<&mut File> {
        self.files.iter_mut().find(|f| f.id == id)
    }

    /// Strip secrets and storage locators before the record leaves the server.
    pub fn sanitize(&mut self) {
        self.remote_ip = None;
        self.upload_token = None;
        self.user = None;
        self.token = None;
        self.login = None;
        self.password = None;
        self.yubikey = None;
        for file in &mut self.files {
            file.sanitize();
        }
    }

    pub fn sanitized(&self) -> Self {
        let mut upload = self.clone();
        upload.sanitize();
        upload
    }
}

/// Options a caller sends to create an upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadParams {
    /// `None` picks the server default, `Some(0)` asks for no expiration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub one_shot: bool,
    #[serde(default)]
    pub removable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yubikey: Option<String>,
    #[serde(default)]
    pub files: Vec<FileParams>,
}

/// A file declared at creation time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileParams {
    #[serde(rename = "fileName")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackendDetails;

    #[test]
    fn new_upload_has_ids() {
        let upload = Upload::new(60);
        assert_eq!(upload.id.len(), UPLOAD_ID_LENGTH);
        assert_eq!(
            upload.upload_token.as_deref().map(str::len),
            Some(UPLOAD_TOKEN_LENGTH)
        );
        assert!(upload.files.is_empty());
    }

    #[test]
    fn zero_ttl_never_expires() {
        let mut upload = Upload::new(0);
        upload.created_at = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        assert!(upload.expires_at().is_none());
        assert!(!upload.is_expired());
    }

    #[test]
    fn expiry_is_inclusive_of_deadline() {
        let mut upload = Upload::new(10);
        let created = DateTime::<Utc>::from_timestamp(1_000, 0).unwrap();
        upload.created_at = created;

        assert!(!upload.is_expired_at(created + Duration::seconds(9)));
        assert!(upload.is_expired_at(created + Duration::seconds(10)));
    }

    #[test]
    fn sanitize_removes_secrets() {
        let mut upload = Upload::new(60);
        upload.remote_ip = Some("10.0.0.1".to_string());
        upload.user = Some("local:alice".to_string());
        upload.token = Some("tok".to_string());
        upload.login = Some("user".to_string());
        upload.password = Some("hash".to_string());
        let mut file = File::new("f1", "a.txt");
        file.backend_details = Some(BackendDetails::Stream);
        upload.files.push(file);

        let clean = upload.sanitized();
        assert!(clean.upload_token.is_none());
        assert!(clean.remote_ip.is_none());
        assert!(clean.user.is_none());
        assert!(clean.token.is_none());
        assert!(clean.login.is_none());
        assert!(clean.password.is_none());
        assert!(clean.files[0].backend_details.is_none());
        // The original record is untouched
        assert!(upload.upload_token.is_some());
    }
}
