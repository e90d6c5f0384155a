use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a file. The lowercase names are part of the API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Declared, no bytes yet.
    #[default]
    Missing,
    /// A single writer holds the claim and is supplying bytes.
    Uploading,
    /// Bytes committed, downloadable.
    Uploaded,
    /// Bytes deleted after having been uploaded.
    Removed,
    /// Abandoned before ever reaching `Uploaded`.
    Deleted,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Missing => "missing",
            FileStatus::Uploading => "uploading",
            FileStatus::Uploaded => "uploaded",
            FileStatus::Removed => "removed",
            FileStatus::Deleted => "deleted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FileStatus::Removed | FileStatus::Deleted)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a data backend put the bytes of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BackendDetails {
    File { path: String },
    Stream,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(rename = "fileName")]
    pub name: String,
    #[serde(rename = "fileSize", default)]
    pub size: u64,
    #[serde(rename = "fileMd5", default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(rename = "fileType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub status: FileStatus,
    #[serde(rename = "fileUploadDate", default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_details: Option<BackendDetails>,
}

impl File {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reference: None,
            name: name.into(),
            size: 0,
            md5: None,
            mime_type: None,
            status: FileStatus::Missing,
            uploaded_at: None,
            backend_details: None,
        }
    }

    /// Drop everything that must not leave the server.
    pub fn sanitize(&mut self) {
        self.backend_details = None;
    }
}
