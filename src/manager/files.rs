use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, info, warn};

use super::{check_file_name, upload_not_found, Preprocessor, UploadManager};
use crate::access::{check_add_file, check_download, check_remove_file, check_remove_upload, UploadAccess};
use crate::data::{DataBackend, FileReader};
use crate::error::Error;
use crate::models::{random_id, File, FileStatus, Upload, FILE_ID_LENGTH};
use crate::state_machine::{self, Completion};

/// Which file an incoming byte stream is for.
#[derive(Debug, Clone, Copy)]
pub enum FileTarget<'a> {
    /// A file declared when the upload was created, by id.
    Declared(&'a str),
    /// A file that does not exist yet, by name.
    New(&'a str),
}

/// A file being served.
pub struct Download {
    pub file: File,
    pub reader: FileReader,
}

impl UploadManager {
    /// Apply `apply` to one file of a stored upload, atomically.
    fn update_file<F>(&self, upload_id: &str, file_id: &str, mut apply: F) -> Result<File, Error>
    where
        F: FnMut(&mut File) -> Result<(), Error>,
    {
        let mut updated = None;
        self.metadata.update_upload(upload_id, &mut |stored| {
            let upload = stored.ok_or_else(|| upload_not_found(upload_id))?;
            let file = upload
                .file_mut(file_id)
                .ok_or_else(|| file_not_found(upload_id, file_id))?;
            apply(file)?;
            updated = Some(file.clone());
            Ok(())
        })?;
        updated.ok_or_else(|| file_not_found(upload_id, file_id))
    }

    /// Take the writer slot of the target file, creating it first if needed.
    fn claim(&self, upload_id: &str, target: FileTarget<'_>) -> Result<File, Error> {
        let name = match target {
            FileTarget::Declared(file_id) => {
                return self.update_file(upload_id, file_id, state_machine::claim_upload)
            }
            FileTarget::New(name) => name,
        };

        check_file_name(name)?;
        let file_id = random_id(FILE_ID_LENGTH);
        let max_files = self.policy.max_files_per_upload;
        let mut claimed = None;

        self.metadata.update_upload(upload_id, &mut |stored| {
            let upload = stored.ok_or_else(|| upload_not_found(upload_id))?;
            if upload.files.len() >= max_files {
                return Err(Error::Invalid(format!(
                    "maximum number of files per upload reached ({max_files})"
                )));
            }
            let mut file = File::new(file_id.clone(), name);
            state_machine::claim_upload(&mut file)?;
            claimed = Some(file.clone());
            upload.files.push(file);
            Ok(())
        })?;
        claimed.ok_or_else(|| file_not_found(upload_id, &file_id))
    }

    /// Write the bytes of a file.
    ///
    /// On failure the partial bytes are removed and the file goes back to
    /// `missing`, so that it can be uploaded again.
    pub async fn add_file(
        &self,
        upload: &Upload,
        access: UploadAccess,
        target: FileTarget<'_>,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<File, Error> {
        check_add_file(upload, access, &self.policy)?;
        let backend = Arc::clone(self.backend_for(upload)?);

        let file = self.claim(&upload.id, target)?;
        debug!(upload_id = %upload.id, file_id = %file.id, "file claimed");

        let mut preprocessor = Preprocessor::new(reader, self.policy.max_file_size);
        let written = backend.add_file(upload, &file, &mut preprocessor).await;

        let details = match written {
            Ok(details) => details,
            Err(e) => {
                let too_big = preprocessor.exceeded();
                warn!(upload_id = %upload.id, file_id = %file.id, error = %e, "file write failed");
                self.abort_write(upload, &file).await;
                if too_big {
                    return Err(Error::Invalid(format!(
                        "file too big (limit is set to {} bytes)",
                        self.policy.max_file_size
                    )));
                }
                return Err(e.into());
            }
        };

        let (size, md5) = preprocessor.finish();
        let completion = Completion {
            size,
            md5,
            mime_type: mime_guess::from_path(&file.name)
                .first_or_octet_stream()
                .to_string(),
            details,
        };

        // The relay was read while uploading, nothing is left to download
        let stream = upload.stream;
        let completed = self.update_file(&upload.id, &file.id, |f| {
            state_machine::complete_upload(f, completion.clone())?;
            if stream {
                state_machine::consume(f)?;
            }
            Ok(())
        });

        match completed {
            Ok(file) => {
                info!(
                    upload_id = %upload.id,
                    file_id = %file.id,
                    size = file.size,
                    "file uploaded"
                );
                Ok(file)
            }
            Err(e) => {
                // Removed while the bytes were being written
                warn!(upload_id = %upload.id, file_id = %file.id, error = %e, "file completion failed");
                self.delete_bytes(upload, &file.id).await;
                Err(e)
            }
        }
    }

    async fn abort_write(&self, upload: &Upload, file: &File) {
        self.delete_bytes(upload, &file.id).await;

        let rollback = self.update_file(&upload.id, &file.id, |f| {
            if f.status == FileStatus::Uploading {
                state_machine::rollback_upload(f)?;
            }
            Ok(())
        });
        if let Err(e) = rollback {
            warn!(upload_id = %upload.id, file_id = %file.id, error = %e, "unable to roll back file status");
        }
    }

    /// Best-effort removal of stored bytes, stream uploads have none.
    async fn delete_bytes(&self, upload: &Upload, file_id: &str) {
        if upload.stream {
            return;
        }
        if let Err(e) = self.data.remove_file(upload, file_id).await {
            warn!(upload_id = %upload.id, file_id = %file_id, error = %e, "unable to remove file bytes");
        }
    }

    /// Open a file for reading.
    ///
    /// One-shot files are marked `removed` before the first byte is served,
    /// and their bytes are deleted once the returned reader is dropped.
    pub async fn get_file(
        &self,
        upload: &Upload,
        access: UploadAccess,
        file_id: &str,
    ) -> Result<Download, Error> {
        let file = upload
            .file(file_id)
            .ok_or_else(|| file_not_found(&upload.id, file_id))?;
        check_download(upload, file, access)?;
        let backend = self.backend_for(upload)?;

        if upload.stream || !upload.one_shot {
            let reader = backend.get_file(upload, file_id).await?;
            return Ok(Download {
                file: file.clone(),
                reader,
            });
        }

        let file = self.update_file(&upload.id, file_id, state_machine::consume)?;
        debug!(upload_id = %upload.id, file_id = %file_id, "one shot file consumed");

        let reader = backend.get_file(upload, file_id).await?;
        Ok(Download {
            file,
            reader: Box::new(ConsumedFile {
                inner: reader,
                cleanup: Some(Cleanup {
                    data: Arc::clone(&self.data),
                    upload: upload.clone(),
                    file_id: file_id.to_string(),
                }),
            }),
        })
    }

    /// Retire one file. The status changes before the bytes go away, so no
    /// new download can start on a file being deleted.
    pub async fn remove_file(
        &self,
        upload: &Upload,
        access: UploadAccess,
        file_id: &str,
    ) -> Result<File, Error> {
        check_remove_file(upload, access)?;

        let mut previous = FileStatus::Missing;
        let file = self.update_file(&upload.id, file_id, |f| {
            previous = state_machine::remove(f)?;
            Ok(())
        })?;

        if previous == FileStatus::Uploaded && !upload.stream {
            self.data.remove_file(upload, file_id).await?;
        }
        info!(upload_id = %upload.id, file_id = %file_id, "file removed");
        Ok(file)
    }

    /// Retire every file of an upload then drop its record.
    ///
    /// The record is kept when some bytes could not be deleted, a retry or
    /// the expiry sweep finishes the job.
    pub async fn delete_upload(&self, upload: &Upload, access: UploadAccess) -> Result<(), Error> {
        check_remove_upload(upload, access)?;

        let mut stored = Vec::new();
        self.metadata.update_upload(&upload.id, &mut |record| {
            let record = record.ok_or_else(|| upload_not_found(&upload.id))?;
            stored.clear();
            for file in &mut record.files {
                match file.status {
                    // Left over by an earlier attempt that could not delete everything
                    FileStatus::Removed => stored.push(file.id.clone()),
                    FileStatus::Deleted => {}
                    _ => {
                        if state_machine::remove(file)? == FileStatus::Uploaded {
                            stored.push(file.id.clone());
                        }
                    }
                }
            }
            Ok(())
        })?;

        let mut failed = 0;
        if !upload.stream {
            for file_id in &stored {
                if let Err(e) = self.data.remove_file(upload, file_id).await {
                    warn!(upload_id = %upload.id, file_id = %file_id, error = %e, "unable to remove file");
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            return Err(Error::Backend(format!("unable to remove {failed} files")));
        }
        if !upload.stream {
            self.data.remove_upload(upload).await?;
        }

        self.metadata.remove_upload(&upload.id)?;
        info!(upload_id = %upload.id, files = stored.len(), "upload removed");
        Ok(())
    }
}

fn file_not_found(upload_id: &str, file_id: &str) -> Error {
    Error::NotFound(format!("file {file_id} not found in upload {upload_id}"))
}

struct Cleanup {
    data: Arc<dyn DataBackend>,
    upload: Upload,
    file_id: String,
}

/// Reader over a consumed one-shot file, deletes the bytes when dropped.
struct ConsumedFile {
    inner: FileReader,
    cleanup: Option<Cleanup>,
}

impl AsyncRead for ConsumedFile {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Drop for ConsumedFile {
    fn drop(&mut self) {
        let Some(Cleanup {
            data,
            upload,
            file_id,
        }) = self.cleanup.take()
        else {
            return;
        };
        // Close the handle before removing what it points to
        self.inner = Box::new(tokio::io::empty());

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = data.remove_file(&upload, &file_id).await {
                        warn!(upload_id = %upload.id, file_id = %file_id, error = %e, "unable to remove consumed file");
                    }
                });
            }
            Err(_) => {
                warn!(upload_id = %upload.id, file_id = %file_id, "no runtime to remove consumed file");
            }
        }
    }
}
