//! Shared helpers for unit tests.

use std::sync::Arc;

use crate::config::UploadPolicy;
use crate::data::{DataBackend, FileBackend, StreamBackend};
use crate::manager::UploadManager;
use crate::metadata::{MemoryBackend, MetadataBackend};

/// An upload manager over in-memory metadata, a file backend in a temporary
/// directory and a stream relay.
pub fn test_manager(policy: UploadPolicy) -> (UploadManager, tempfile::TempDir) {
    let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let data = FileBackend::new(temp_dir.path().join("files"))
        .expect("Failed to create test file backend");

    let metadata: Arc<dyn MetadataBackend> = Arc::new(MemoryBackend::new());
    let data: Arc<dyn DataBackend> = Arc::new(data);
    let stream: Arc<dyn DataBackend> = Arc::new(StreamBackend::new());

    let manager = UploadManager::new(metadata, data, Some(stream), policy);
    (manager, temp_dir)
}
