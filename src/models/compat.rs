//! Reading records written in the legacy v1 shape.
//!
//! v1 stored dates as unix seconds, a signed TTL where `-1` meant "never",
//! files as an object keyed by id and backend details as a free-form map.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::file::{BackendDetails, File, FileStatus};
use super::upload::Upload;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadV1 {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub upload_date: i64,
    #[serde(default)]
    pub ttl: i64,
    #[serde(default)]
    pub upload_ip: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub upload_token: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
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
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub protected_by_yubikey: bool,
    #[serde(default)]
    pub yubikey: Option<String>,
    #[serde(default)]
    pub files: BTreeMap<String, FileV1>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileV1 {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_md5: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub file_upload_date: i64,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub backend_details: Option<serde_json::Value>,
}

/// Decode a stored upload, trying the current shape before the legacy one.
///
/// When neither shape matches, the error of the current shape is returned.
pub fn decode_upload(bytes: &[u8]) -> Result<Upload, serde_json::Error> {
    match serde_json::from_slice::<Upload>(bytes) {
        Ok(upload) => Ok(upload),
        Err(current) => match serde_json::from_slice::<UploadV1>(bytes) {
            Ok(legacy) => Ok(legacy.into()),
            Err(_) => Err(current),
        },
    }
}

impl From<UploadV1> for Upload {
    fn from(v1: UploadV1) -> Self {
        let files = v1
            .files
            .into_iter()
            .map(|(key, mut file)| {
                if file.id.is_empty() {
                    file.id = key;
                }
                File::from(file)
            })
            .collect();

        Upload {
            id: v1.id,
            created_at: timestamp(v1.upload_date),
            ttl: u64::try_from(v1.ttl).unwrap_or(0),
            comments: v1.comments,
            remote_ip: v1.upload_ip,
            upload_token: v1.upload_token,
            user: v1.user,
            token: v1.token,
            admin: v1.admin,
            stream: v1.stream,
            one_shot: v1.one_shot,
            removable: v1.removable,
            protected_by_password: v1.protected_by_password,
            login: v1.login,
            password: v1.password,
            protected_by_yubikey: v1.protected_by_yubikey,
            yubikey: v1.yubikey,
            files,
        }
    }
}

impl From<FileV1> for File {
    fn from(v1: FileV1) -> Self {
        let status = match v1.status.as_str() {
            "" | "missing" => FileStatus::Missing,
            "uploading" => FileStatus::Uploading,
            "uploaded" => FileStatus::Uploaded,
            "removed" => FileStatus::Removed,
            // Unknown statuses deny access
            _ => FileStatus::Deleted,
        };

        let backend_details = v1
            .backend_details
            .as_ref()
            .and_then(|details| details.get("path"))
            .and_then(|path| path.as_str())
            .map(|path| BackendDetails::File {
                path: path.to_string(),
            });

        File {
            id: v1.id,
            reference: v1.reference,
            name: v1.file_name,
            size: v1.file_size,
            md5: non_empty(v1.file_md5),
            mime_type: non_empty(v1.file_type),
            status,
            uploaded_at: (v1.file_upload_date > 0).then(|| timestamp(v1.file_upload_date)),
            backend_details,
        }
    }
}

fn timestamp(seconds: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(seconds, 0).unwrap_or_default()
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = r#"{
        "id": "legacyUpload01",
        "uploadDate": 1500000000,
        "ttl": -1,
        "uploadIp": "192.168.0.1",
        "uploadToken": "secret",
        "oneShot": true,
        "files": {
            "fileA": {
                "fileName": "a.txt",
                "fileMd5": "0cc175b9c0f1b6a831c399e269772661",
                "status": "uploaded",
                "fileType": "text/plain",
                "fileUploadDate": 1500000100,
                "fileSize": 1,
                "backendDetails": {"path": "/files/le/legacyUpload01/fileA"}
            },
            "fileB": {
                "id": "fileB",
                "fileName": "b.txt",
                "status": ""
            }
        }
    }"#;

    #[test]
    fn legacy_record_keeps_every_file() {
        let upload = decode_upload(LEGACY.as_bytes()).unwrap();

        assert_eq!(upload.id, "legacyUpload01");
        assert_eq!(upload.ttl, 0);
        assert_eq!(upload.created_at.timestamp(), 1_500_000_000);
        assert_eq!(upload.remote_ip.as_deref(), Some("192.168.0.1"));
        assert!(upload.one_shot);
        assert_eq!(upload.files.len(), 2);

        let a = upload.file("fileA").expect("file id taken from the map key");
        assert_eq!(a.status, FileStatus::Uploaded);
        assert_eq!(a.mime_type.as_deref(), Some("text/plain"));
        assert_eq!(
            a.backend_details,
            Some(BackendDetails::File {
                path: "/files/le/legacyUpload01/fileA".to_string()
            })
        );

        let b = upload.file("fileB").unwrap();
        assert_eq!(b.status, FileStatus::Missing);
        assert!(b.md5.is_none());
        assert!(b.uploaded_at.is_none());
    }

    #[test]
    fn current_record_is_decoded_directly() {
        let mut upload = Upload::new(3600);
        upload.files.push(File::new("f1", "one.txt"));
        let bytes = serde_json::to_vec(&upload).unwrap();

        assert_eq!(decode_upload(&bytes).unwrap(), upload);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_upload(b"[1, 2, 3]").is_err());
    }
}
