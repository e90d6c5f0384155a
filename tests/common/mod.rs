//! Shared helpers for file-drop integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use file_drop::client::Source;
use file_drop::config::{
    Config, MetadataEngine, NodeConfig, StorageConfig, SweeperConfig, UploadPolicy,
};
use file_drop::data::{DataBackend, DataError, FileBackend, FileReader, StreamBackend};
use file_drop::manager::UploadManager;
use file_drop::metadata::{Database, MemoryBackend, MetadataBackend};
use file_drop::models::{BackendDetails, File, Upload};
use file_drop::AppState;

pub fn test_db() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    (dir, db)
}

/// Both metadata engines, each with the directory it lives in.
pub fn metadata_engines() -> Vec<(&'static str, tempfile::TempDir, Arc<dyn MetadataBackend>)> {
    let (db_dir, db) = test_db();
    let memory_dir = tempfile::tempdir().unwrap();
    let db: Arc<dyn MetadataBackend> = Arc::new(db);
    let memory: Arc<dyn MetadataBackend> = Arc::new(MemoryBackend::new());
    vec![("redb", db_dir, db), ("memory", memory_dir, memory)]
}

pub struct TestEnv {
    pub dir: tempfile::TempDir,
    pub metadata: Arc<dyn MetadataBackend>,
    pub data: Arc<FaultyData>,
    pub manager: Arc<UploadManager>,
}

/// A manager on redb metadata and a local file backend, with stream relays.
pub fn test_env(policy: UploadPolicy) -> TestEnv {
    let (dir, db) = test_db();
    let files = FileBackend::new(dir.path().join("files")).unwrap();
    let metadata: Arc<dyn MetadataBackend> = Arc::new(db);
    let data = Arc::new(FaultyData::new(Arc::new(files)));
    let stream: Arc<dyn DataBackend> = Arc::new(StreamBackend::new());

    let manager = Arc::new(UploadManager::new(
        Arc::clone(&metadata),
        Arc::clone(&data) as Arc<dyn DataBackend>,
        Some(stream),
        policy,
    ));
    TestEnv {
        dir,
        metadata,
        data,
        manager,
    }
}

pub fn test_state(env: &TestEnv) -> Arc<AppState> {
    let config = Config {
        node: NodeConfig {
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: env.dir.path().join("data").to_string_lossy().to_string(),
        },
        storage: StorageConfig {
            metadata: MetadataEngine::Redb,
            file_storage_path: env.dir.path().join("files").to_string_lossy().to_string(),
        },
        uploads: env.manager.policy().clone(),
        sweeper: SweeperConfig::default(),
    };

    Arc::new(AppState {
        config,
        metadata: Arc::clone(&env.metadata),
        manager: Arc::clone(&env.manager),
    })
}

/// Serve the API on an ephemeral port and return its base URL.
pub async fn spawn_server(state: Arc<AppState>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = file_drop::api::create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn source(content: &[u8]) -> Source {
    Box::new(std::io::Cursor::new(content.to_vec()))
}

pub async fn read_all(mut reader: FileReader) -> Vec<u8> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await.unwrap();
    buf
}

/// Data backend wrapper whose writes and deletions can be made to fail.
pub struct FaultyData {
    inner: Arc<dyn DataBackend>,
    pub fail_writes: AtomicBool,
    pub fail_removals: AtomicBool,
}

impl FaultyData {
    pub fn new(inner: Arc<dyn DataBackend>) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            fail_removals: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_removals(&self, fail: bool) {
        self.fail_removals.store(fail, Ordering::SeqCst);
    }

    fn injected() -> DataError {
        DataError::Io(std::io::Error::other("injected failure"))
    }
}

#[async_trait]
impl DataBackend for FaultyData {
    async fn add_file(
        &self,
        upload: &Upload,
        file: &File,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<BackendDetails, DataError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.add_file(upload, file, reader).await
    }

    async fn get_file(&self, upload: &Upload, file_id: &str) -> Result<FileReader, DataError> {
        self.inner.get_file(upload, file_id).await
    }

    async fn remove_file(&self, upload: &Upload, file_id: &str) -> Result<(), DataError> {
        if self.fail_removals.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.remove_file(upload, file_id).await
    }

    async fn remove_upload(&self, upload: &Upload) -> Result<(), DataError> {
        if self.fail_removals.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.remove_upload(upload).await
    }
}
