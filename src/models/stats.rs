use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::file::{File, FileStatus};
use super::upload::Upload;

/// How many file types the server statistics report.
pub const TOP_FILE_TYPES: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeStats {
    pub file_type: String,
    pub count: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub uploads: u64,
    pub files: u64,
    pub total_size: u64,
}

impl UserStats {
    pub fn add_upload(&mut self, upload: &Upload) {
        self.uploads += 1;
        for file in stored_files(upload) {
            self.files += 1;
            self.total_size += file.size;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStats {
    pub users: u64,
    pub uploads: u64,
    pub anonymous_uploads: u64,
    pub files: u64,
    pub total_size: u64,
    pub anonymous_size: u64,
    pub file_types_by_count: Vec<TypeStats>,
    pub file_types_by_size: Vec<TypeStats>,
}

impl ServerStats {
    /// Aggregate statistics over every upload of the server.
    pub fn collect<I>(users: u64, uploads: I) -> Self
    where
        I: IntoIterator<Item = Upload>,
    {
        let mut stats = ServerStats {
            users,
            ..Default::default()
        };
        let mut types = TypeAggregator::default();

        for upload in uploads {
            stats.uploads += 1;
            let anonymous = upload.user.is_none();
            if anonymous {
                stats.anonymous_uploads += 1;
            }
            for file in stored_files(&upload) {
                stats.files += 1;
                stats.total_size += file.size;
                if anonymous {
                    stats.anonymous_size += file.size;
                }
                types.add(file);
            }
        }

        stats.file_types_by_count = types.top_by_count(TOP_FILE_TYPES);
        stats.file_types_by_size = types.top_by_size(TOP_FILE_TYPES);
        stats
    }
}

/// Counts files and bytes per MIME type.
#[derive(Debug, Default)]
pub struct TypeAggregator {
    types: HashMap<String, TypeStats>,
}

impl TypeAggregator {
    pub fn add(&mut self, file: &File) {
        let file_type = file
            .mime_type
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let entry = self
            .types
            .entry(file_type.clone())
            .or_insert_with(|| TypeStats {
                file_type,
                ..Default::default()
            });
        entry.count += 1;
        entry.size += file.size;
    }

    pub fn top_by_count(&self, limit: usize) -> Vec<TypeStats> {
        self.top(limit, |t| t.count)
    }

    pub fn top_by_size(&self, limit: usize) -> Vec<TypeStats> {
        self.top(limit, |t| t.size)
    }

    fn top(&self, limit: usize, key: impl Fn(&TypeStats) -> u64) -> Vec<TypeStats> {
        let mut all: Vec<TypeStats> = self.types.values().cloned().collect();
        all.sort_by(|a, b| {
            key(b)
                .cmp(&key(a))
                .then_with(|| a.file_type.cmp(&b.file_type))
        });
        all.truncate(limit);
        all
    }
}

/// Files whose bytes are currently stored.
fn stored_files(upload: &Upload) -> impl Iterator<Item = &File> {
    upload
        .files
        .iter()
        .filter(|f| f.status == FileStatus::Uploaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uploaded(id: &str, mime: &str, size: u64) -> File {
        let mut file = File::new(id, format!("{id}.bin"));
        file.status = FileStatus::Uploaded;
        file.mime_type = Some(mime.to_string());
        file.size = size;
        file
    }

    #[test]
    fn aggregator_orders_by_count_and_size() {
        let mut types = TypeAggregator::default();
        types.add(&uploaded("a", "text/plain", 1));
        types.add(&uploaded("b", "text/plain", 1));
        types.add(&uploaded("c", "image/png", 100));

        let by_count = types.top_by_count(10);
        assert_eq!(by_count[0].file_type, "text/plain");
        assert_eq!(by_count[0].count, 2);

        let by_size = types.top_by_size(1);
        assert_eq!(by_size.len(), 1);
        assert_eq!(by_size[0].file_type, "image/png");
    }

    #[test]
    fn only_stored_files_are_counted() {
        let mut upload = Upload::new(0);
        upload.files.push(uploaded("a", "text/plain", 10));
        let mut missing = File::new("b", "b.txt");
        missing.size = 99;
        upload.files.push(missing);

        let stats = ServerStats::collect(0, vec![upload.clone()]);
        assert_eq!(stats.uploads, 1);
        assert_eq!(stats.anonymous_uploads, 1);
        assert_eq!(stats.files, 1);
        assert_eq!(stats.total_size, 10);
        assert_eq!(stats.anonymous_size, 10);

        let mut user = UserStats::default();
        user.add_upload(&upload);
        assert_eq!(user.files, 1);
        assert_eq!(user.total_size, 10);
    }
}
