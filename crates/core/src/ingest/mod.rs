use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Multipart field the audio clip is uploaded under.
pub const UPLOAD_FIELD: &str = "Speechfile";

const FALLBACK_EXTENSION: &str = "bin";
const MAX_EXTENSION_LEN: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upload {
    pub file_name: Option<String>,
    pub bytes: Bytes,
}

impl Upload {
    pub fn new<S: Into<String>, B: Into<Bytes>>(file_name: S, bytes: B) -> Self {
        Self {
            file_name: Some(file_name.into()),
            bytes: bytes.into(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("No file uploaded")]
    MissingUpload,

    #[error("No file selected")]
    MissingFileName,

    #[error("Uploaded file is empty")]
    EmptyUpload,

    #[error("failed to store upload at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IngestError {
    /// True when the caller sent something unusable, as opposed to a local I/O fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Storage { .. })
    }
}

/// A stored upload. The backing file is removed when the handle is dropped, so
/// every exit path of a request cleans up after itself.
#[derive(Debug)]
pub struct AudioArtifact {
    id: Uuid,
    path: PathBuf,
    byte_len: u64,
    extension: String,
}

impl AudioArtifact {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn byte_len(&self) -> u64 {
        self.byte_len
    }

    /// Lower-cased extension of the uploaded file name, used as a container hint.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}

impl Drop for AudioArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(artifact = %self.id, "artifact removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(artifact = %self.id, path = %self.path.display(), error = %e, "failed to remove artifact")
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct AudioIngestor {
    scratch_dir: PathBuf,
}

impl AudioIngestor {
    pub fn new<P: Into<PathBuf>>(scratch_dir: P) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }

    pub async fn ingest(&self, upload: Upload) -> Result<AudioArtifact, IngestError> {
        let file_name = upload
            .file_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or(IngestError::MissingFileName)?;
        if upload.bytes.is_empty() {
            return Err(IngestError::EmptyUpload);
        }

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|source| IngestError::Storage {
                path: self.scratch_dir.clone(),
                source,
            })?;

        let id = Uuid::new_v4();
        let extension = sanitize_extension(file_name);
        let path = self.scratch_dir.join(format!("{id}.{extension}"));

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| IngestError::Storage {
                path: path.clone(),
                source,
            })?;

        // Owns the file from here on: a failed write below still removes it.
        let artifact = AudioArtifact {
            id,
            path,
            byte_len: upload.bytes.len() as u64,
            extension,
        };

        let written = async {
            file.write_all(&upload.bytes).await?;
            file.flush().await
        }
        .await;
        drop(file);
        written.map_err(|source| IngestError::Storage {
            path: artifact.path.clone(),
            source,
        })?;

        tracing::debug!(
            artifact = %artifact.id,
            bytes = artifact.byte_len,
            extension = %artifact.extension,
            "upload stored"
        );
        Ok(artifact)
    }
}

fn sanitize_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_owned())
}
