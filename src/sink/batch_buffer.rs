//! Local scratch file for one in-flight batch.
//!
//! ## Lifecycle
//!
//! ```text
//! open(path) ──► append(record)* ──► close() ──► ClosedBuffer
//!  (mkdir -p,      (one JSON line      (flush, fsync,
//!   O_APPEND)       per record)         release handle)
//! ```
//!
//! `close` consumes the buffer, so the file can only be read back for upload
//! after the write handle has been flushed and dropped.

use crate::sink::error::{LocalOp, SinkError};
use crate::sink::json::encode_line;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Append-only JSON Lines writer over a local scratch file
#[derive(Debug)]
pub struct BatchBuffer {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes_written: u64,
    records_written: u64,
}

/// Result of closing a buffer: the file is complete and no longer open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedBuffer {
    pub path: PathBuf,
    /// File size after close
    pub bytes: u64,
    /// Records appended through this buffer
    pub records: u64,
}

impl BatchBuffer {
    /// Open `path` for appending, creating missing parent directories
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SinkError::local_io(LocalOp::CreateDir, parent, e))?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SinkError::local_io(LocalOp::Open, &path, e))?;
        let existing = file
            .metadata()
            .map_err(|e| SinkError::local_io(LocalOp::Open, &path, e))?
            .len();

        Ok(BatchBuffer {
            path,
            writer: BufWriter::new(file),
            bytes_written: existing,
            records_written: 0,
        })
    }

    /// Append one record as a JSON line.
    ///
    /// The record is encoded in memory first; an unencodable record leaves
    /// the file untouched.
    pub fn append<T>(&mut self, record: &T) -> Result<(), SinkError>
    where
        T: Serialize + ?Sized,
    {
        let line = encode_line(record)?;
        self.append_encoded(&line)
    }

    /// Append an already encoded line (must end with `\n`)
    pub fn append_encoded(&mut self, line: &[u8]) -> Result<(), SinkError> {
        debug_assert!(
            line.last() == Some(&b'\n'),
            "Precondition: encoded line must end with a newline"
        );

        self.writer
            .write_all(line)
            .map_err(|e| SinkError::local_io(LocalOp::Append, &self.path, e))?;
        self.bytes_written += line.len() as u64;
        self.records_written += 1;
        Ok(())
    }

    /// Flush, fsync and release the file handle
    pub fn close(self) -> Result<ClosedBuffer, SinkError> {
        let BatchBuffer {
            path,
            writer,
            bytes_written,
            records_written,
        } = self;

        let file = writer
            .into_inner()
            .map_err(|e| SinkError::local_io(LocalOp::Flush, &path, e.into_error()))?;
        file.sync_all()
            .map_err(|e| SinkError::local_io(LocalOp::Flush, &path, e))?;
        drop(file);

        Ok(ClosedBuffer {
            path,
            bytes: bytes_written,
            records: records_written,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes in the file, including any content present before `open`
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }
}
