use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::pipeline::{now_unix_ms, sanitize_id};

/// Multipart field that carries the media payload.
pub const UPLOAD_FIELD: &str = "video";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadHandle {
    pub storage_path: PathBuf,
    pub original_name: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("request must include a file field named 'video'")]
    MissingFile,
    #[error("request must include exactly one file field")]
    MultipleFiles,
    #[error("unexpected file field '{0}'")]
    UnexpectedField(String),
    #[error("malformed multipart body: {0}")]
    Malformed(String),
    #[error("upload exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error("failed to store upload: {0}")]
    Io(#[from] io::Error),
}

impl UploadError {
    /// Everything except storage I/O is the caller's fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

#[derive(Debug, Clone)]
pub struct UploadReceiver {
    dir: PathBuf,
    max_bytes: u64,
}

impl UploadReceiver {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        self.dir.as_path()
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Opens a uniquely named transient file; nothing downstream sees it until `finish`.
    pub async fn begin(&self, original_name: &str) -> Result<PendingUpload, UploadError> {
        fs::create_dir_all(self.dir.as_path()).await?;
        let original_name = display_name(original_name);
        let path = self.dir.join(transient_file_name(
            original_name.as_str(),
            now_unix_ms(),
            Uuid::new_v4(),
        ));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path.as_path())
            .await?;
        Ok(PendingUpload {
            path,
            original_name,
            file: Some(file),
            written: 0,
            max_bytes: self.max_bytes,
            finished: false,
        })
    }

    pub async fn receive_bytes(
        &self,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<UploadHandle, UploadError> {
        let mut pending = self.begin(original_name).await?;
        pending.write_chunk(bytes).await?;
        pending.finish().await
    }
}

/// A transient file still being written. Dropping it unfinished removes the file.
#[derive(Debug)]
pub struct PendingUpload {
    path: PathBuf,
    original_name: String,
    file: Option<File>,
    written: u64,
    max_bytes: u64,
    finished: bool,
}

impl PendingUpload {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), UploadError> {
        let next = self.written + chunk.len() as u64;
        if next > self.max_bytes {
            return Err(UploadError::TooLarge {
                limit: self.max_bytes,
            });
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("upload file already closed"))?;
        file.write_all(chunk).await?;
        self.written = next;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<UploadHandle, UploadError> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| io::Error::other("upload file already closed"))?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        self.finished = true;

        debug!(
            path = %self.path.display(),
            original_name = %self.original_name,
            bytes = self.written,
            "upload stored"
        );
        Ok(UploadHandle {
            storage_path: self.path.clone(),
            original_name: self.original_name.clone(),
            received_at: Utc::now(),
        })
    }
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.file.take();
        if let Err(error) = std::fs::remove_file(self.path.as_path()) {
            if error.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), %error, "failed to remove partial upload");
            }
        }
    }
}

/// Owns a stored upload until the pipeline is done with it. The backing file is removed
/// exactly once: by `remove`, or on drop if `remove` never ran.
#[derive(Debug)]
pub struct TransientUpload {
    handle: UploadHandle,
    removed: bool,
}

impl TransientUpload {
    pub fn new(handle: UploadHandle) -> Self {
        Self {
            handle,
            removed: false,
        }
    }

    pub fn handle(&self) -> &UploadHandle {
        &self.handle
    }

    pub async fn remove(mut self) -> io::Result<()> {
        self.removed = true;
        match fs::remove_file(self.handle.storage_path.as_path()).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error),
        }
    }
}

impl Drop for TransientUpload {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        let path = self.handle.storage_path.as_path();
        if let Err(error) = std::fs::remove_file(path) {
            if error.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), %error, "failed to remove transient upload");
            }
        }
    }
}

fn display_name(raw: &str) -> String {
    let base = Path::new(raw.trim())
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::trim)
        .unwrap_or_default();
    if base.is_empty() {
        String::from("upload")
    } else {
        base.to_string()
    }
}

/// `{unix_ms}_{uuid}_{stem}[.ext]` with both parts sanitized.
pub fn transient_file_name(original_name: &str, unix_ms: u128, token: Uuid) -> String {
    let path = Path::new(original_name);
    let stem = path
        .file_stem()
        .and_then(|v| v.to_str())
        .map(sanitize_id)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| String::from("upload"));
    let extension = path
        .extension()
        .and_then(|v| v.to_str())
        .map(sanitize_id)
        .filter(|v| !v.is_empty())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();
    format!("{unix_ms}_{}_{stem}{extension}", token.simple())
}
