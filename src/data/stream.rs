use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;

use super::{DataBackend, DataError, FileReader};
use crate::models::{BackendDetails, File, Upload};

/// Most bytes an uploader gets ahead of its downloader before it blocks.
const RELAY_BUFFER: usize = 8 * 1024;

/// Pending hand-off between one uploader and one downloader.
struct Relay {
    reader: DuplexStream,
    attached: oneshot::Sender<()>,
}

type Relays = Arc<Mutex<HashMap<String, Relay>>>;

/// Pass-through backend: bytes are never stored, the uploader blocks until a
/// downloader attaches and then pipes straight into it.
#[derive(Default)]
pub struct StreamBackend {
    relays: Relays,
}

impl StreamBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of uploaders currently waiting for a reader.
    pub fn pending(&self) -> usize {
        lock(&self.relays).len()
    }
}

fn lock(relays: &Relays) -> MutexGuard<'_, HashMap<String, Relay>> {
    relays.lock().unwrap_or_else(PoisonError::into_inner)
}

fn relay_key(upload_id: &str, file_id: &str) -> String {
    format!("{upload_id}/{file_id}")
}

/// Removes the relay when the writer returns, whatever the outcome.
struct RelayGuard {
    relays: Relays,
    key: String,
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        lock(&self.relays).remove(&self.key);
    }
}

#[async_trait]
impl DataBackend for StreamBackend {
    async fn add_file(
        &self,
        upload: &Upload,
        file: &File,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<BackendDetails, DataError> {
        let key = relay_key(&upload.id, &file.id);
        let (mut upstream, downstream) = tokio::io::duplex(RELAY_BUFFER);
        let (attached_tx, attached_rx) = oneshot::channel();

        {
            let mut relays = lock(&self.relays);
            if relays.contains_key(&key) {
                return Err(DataError::Io(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("a writer is already streaming {key}"),
                )));
            }
            relays.insert(
                key.clone(),
                Relay {
                    reader: downstream,
                    attached: attached_tx,
                },
            );
        }
        let _guard = RelayGuard {
            relays: Arc::clone(&self.relays),
            key: key.clone(),
        };

        tracing::debug!(relay = %key, "waiting for a downloader");
        if attached_rx.await.is_err() {
            return Err(DataError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("relay {key} closed before a downloader attached"),
            )));
        }

        tokio::io::copy(reader, &mut upstream).await?;
        upstream.shutdown().await?;
        Ok(BackendDetails::Stream)
    }

    async fn get_file(&self, upload: &Upload, file_id: &str) -> Result<FileReader, DataError> {
        let key = relay_key(&upload.id, file_id);
        let relay = lock(&self.relays).remove(&key).ok_or_else(|| {
            DataError::NotFound(format!("no uploader is streaming {key}"))
        })?;

        // The writer may have given up in the meantime, the reader then sees EOF.
        let _ = relay.attached.send(());
        Ok(Box::new(relay.reader))
    }

    async fn remove_file(&self, _upload: &Upload, _file_id: &str) -> Result<(), DataError> {
        Err(DataError::Unsupported(
            "can't remove a file from the stream backend".to_string(),
        ))
    }

    async fn remove_upload(&self, _upload: &Upload) -> Result<(), DataError> {
        Err(DataError::Unsupported(
            "can't remove an upload from the stream backend".to_string(),
        ))
    }
}
