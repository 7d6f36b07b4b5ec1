//! Error taxonomy for the batch sink.
//!
//! Every failure the core can produce is one of these variants. Nothing is
//! retried internally; the driver decides what to do with each of them.

use crate::sink::controller::SealedBatch;
use crate::sink::object_store::ObjectStoreError;
use std::io::Error as IoError;
use std::path::{Path, PathBuf};

/// Local filesystem operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOp {
    CreateDir,
    Open,
    Append,
    Flush,
    Read,
    Delete,
}

impl std::fmt::Display for LocalOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            LocalOp::CreateDir => "create directory",
            LocalOp::Open => "open",
            LocalOp::Append => "append to",
            LocalOp::Flush => "flush",
            LocalOp::Read => "read",
            LocalOp::Delete => "delete",
        };
        f.write_str(op)
    }
}

/// Error type for batch sink operations
#[derive(Debug)]
pub enum SinkError {
    /// Configuration is missing or invalid
    Configuration(String),
    /// A record could not be encoded as JSON
    Serialization(serde_json::Error),
    /// Scratch file or directory operation failed
    LocalIo {
        op: LocalOp,
        path: PathBuf,
        source: IoError,
    },
    /// Scratch file could not be flushed or synced at close. The file named
    /// in `batch` is left in place and may be incomplete.
    Seal { batch: SealedBatch, source: IoError },
    /// Upload failed. The scratch file named in `batch` is left in place.
    Transfer {
        batch: SealedBatch,
        source: ObjectStoreError,
    },
    /// `start_batch` called while a batch is still open
    BatchAlreadyOpen { stream: String, batch_id: String },
    /// `process_record` or `process_batch` called without an open batch
    NoActiveBatch { stream: String },
    /// Stream name would place the scratch file outside the scratch directory
    InvalidStreamName { stream: String },
}

impl SinkError {
    pub(crate) fn local_io(op: LocalOp, path: &Path, source: IoError) -> Self {
        SinkError::LocalIo {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// The batch left on disk by a failed seal or upload.
    ///
    /// Pass it to `BatchController::retry_upload`; a scratch file that does
    /// not hold every byte written is refused there with another `Seal`.
    pub fn sealed_batch(&self) -> Option<&SealedBatch> {
        match self {
            SinkError::Seal { batch, .. } | SinkError::Transfer { batch, .. } => Some(batch),
            _ => None,
        }
    }
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            SinkError::Serialization(e) => write!(f, "Record serialization failed: {}", e),
            SinkError::LocalIo { op, path, source } => {
                write!(f, "Failed to {} {}: {}", op, path.display(), source)
            }
            SinkError::Seal { batch, source } => write!(
                f,
                "Failed to seal batch {} (scratch file kept at {}): {}",
                batch.batch_id,
                batch.scratch_path.display(),
                source
            ),
            SinkError::Transfer { batch, source } => write!(
                f,
                "Upload of batch {} to {} failed (scratch file kept at {}): {}",
                batch.batch_id,
                batch.key,
                batch.scratch_path.display(),
                source
            ),
            SinkError::BatchAlreadyOpen { stream, batch_id } => write!(
                f,
                "Stream {} already has open batch {}",
                stream, batch_id
            ),
            SinkError::NoActiveBatch { stream } => {
                write!(f, "Stream {} has no open batch", stream)
            }
            SinkError::InvalidStreamName { stream } => {
                write!(f, "Stream name {:?} is not a valid file name component", stream)
            }
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Serialization(e) => Some(e),
            SinkError::LocalIo { source, .. } | SinkError::Seal { source, .. } => Some(source),
            SinkError::Transfer { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(e: serde_json::Error) -> Self {
        SinkError::Serialization(e)
    }
}
