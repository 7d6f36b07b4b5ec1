//! Batch Lifecycle Controller
//!
//! One controller per stream. The driver calls three hooks per batch:
//!
//! ```text
//!            start_batch(id)            process_batch()
//!   Idle ─────────────────────► Open ─────────────────────► Idle
//!                               │  ▲
//!                               └──┘ process_record(r)
//! ```
//!
//! `process_batch` seals the scratch file, uploads it as one object and
//! deletes it only after the store has acknowledged the put. A failed seal or
//! upload leaves the scratch file untouched and hands its `SealedBatch` back
//! inside the error, so the same bytes can be uploaded again with
//! `retry_upload`. An upload is refused when the scratch file no longer holds
//! exactly the bytes written to it.

use crate::sink::batch_buffer::BatchBuffer;
use crate::sink::config::SinkConfig;
use crate::sink::error::{LocalOp, SinkError};
use crate::sink::key_builder::{build_filename, build_key, KeyScheme};
use crate::sink::object_store::ObjectStore;
use bytes::Bytes;
use serde::Serialize;
use std::io::{Error as IoError, ErrorKind};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// State of the batch currently open on a stream
#[derive(Debug)]
pub struct BatchContext {
    batch_id: String,
    key: String,
    buffer: BatchBuffer,
}

impl BatchContext {
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Destination key computed at batch start
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn scratch_path(&self) -> &Path {
        self.buffer.path()
    }

    pub fn record_count(&self) -> u64 {
        self.buffer.records_written()
    }
}

/// A closed batch whose scratch file is complete and ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBatch {
    pub stream: String,
    pub batch_id: String,
    pub key: String,
    pub scratch_path: PathBuf,
    pub records: u64,
    pub bytes: u64,
}

/// What happened to a sealed batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Uploaded and the scratch file removed
    Uploaded,
    /// Uploaded, but the scratch file could not be removed
    UploadedScratchRetained,
    /// No bucket configured in local-only mode; scratch file kept
    SkippedLocalOnly,
}

/// Result of a successful `process_batch`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub batch: SealedBatch,
    pub bucket: Option<String>,
    pub disposition: Disposition,
}

impl BatchOutcome {
    /// Whether the object reached the store
    pub fn is_delivered(&self) -> bool {
        matches!(
            self.disposition,
            Disposition::Uploaded | Disposition::UploadedScratchRetained
        )
    }
}

/// Per-controller counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub batches_started: u64,
    pub batches_uploaded: u64,
    pub batches_skipped: u64,
    pub upload_failures: u64,
    pub cleanup_failures: u64,
    pub records_processed: u64,
    pub bytes_uploaded: u64,
}

/// Drives start → accumulate → upload → cleanup for one stream
pub struct BatchController {
    stream: String,
    config: Arc<SinkConfig>,
    scheme: KeyScheme,
    store: Arc<dyn ObjectStore>,
    active: Option<BatchContext>,
    stats: ControllerStats,
}

impl std::fmt::Debug for BatchController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchController")
            .field("stream", &self.stream)
            .field("scheme", &self.scheme)
            .field("active", &self.active)
            .field("stats", &self.stats)
            .finish()
    }
}

impl BatchController {
    /// Create a controller for `stream`. `config` must already be validated.
    pub fn new(
        stream: impl Into<String>,
        config: Arc<SinkConfig>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        let scheme = config.key_scheme();
        BatchController {
            stream: stream.into(),
            config,
            scheme,
            store,
            active: None,
            stats: ControllerStats::default(),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    /// The open batch, if any
    pub fn context(&self) -> Option<&BatchContext> {
        self.active.as_ref()
    }

    /// Records appended to the open batch (0 when idle)
    pub fn record_count(&self) -> u64 {
        self.active.as_ref().map_or(0, BatchContext::record_count)
    }

    /// Whether the open batch has reached `max_size`.
    ///
    /// Advisory only: `process_record` never rejects records past the limit.
    pub fn is_full(&self) -> bool {
        self.record_count() >= self.config.max_size as u64
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    /// Key the given batch id would be uploaded to
    pub fn key_for(&self, batch_id: &str) -> String {
        build_key(
            &self.stream,
            &self.config.hive_partitions,
            batch_id,
            &self.scheme,
        )
    }

    /// Local scratch path the given batch id would be buffered in.
    ///
    /// Fails when the stream name or the file name built from it is not a
    /// single plain path component.
    pub fn scratch_path_for(&self, batch_id: &str) -> Result<PathBuf, SinkError> {
        let filename = build_filename(&self.stream, batch_id, &self.scheme);
        if !is_plain_component(&self.stream) || !is_plain_component(&filename) {
            return Err(SinkError::InvalidStreamName {
                stream: self.stream.clone(),
            });
        }
        Ok(self.config.scratch_dir.join(filename))
    }

    /// Idle → Open: compute key and scratch path, open a fresh buffer
    pub fn start_batch(&mut self, batch_id: impl Into<String>) -> Result<&BatchContext, SinkError> {
        let batch_id = batch_id.into();
        debug_assert!(!batch_id.is_empty(), "Precondition: batch id must not be empty");

        if let Some(active) = &self.active {
            return Err(SinkError::BatchAlreadyOpen {
                stream: self.stream.clone(),
                batch_id: active.batch_id.clone(),
            });
        }

        let scratch_path = self.scratch_path_for(&batch_id)?;
        let key = self.key_for(&batch_id);
        let buffer = BatchBuffer::open(scratch_path)?;
        if buffer.bytes_written() > 0 {
            warn!(
                stream = %self.stream,
                batch_id = %batch_id,
                path = %buffer.path().display(),
                "scratch file already has content, appending to it"
            );
        }

        debug!(
            stream = %self.stream,
            batch_id = %batch_id,
            key = %key,
            scratch = %buffer.path().display(),
            "batch started"
        );
        self.stats.batches_started += 1;

        let context = self.active.insert(BatchContext {
            batch_id,
            key,
            buffer,
        });
        Ok(&*context)
    }

    /// Open → Open: append one record to the open batch
    pub fn process_record<T>(&mut self, record: &T) -> Result<(), SinkError>
    where
        T: Serialize + ?Sized,
    {
        let context = self.active.as_mut().ok_or_else(|| SinkError::NoActiveBatch {
            stream: self.stream.clone(),
        })?;

        context.buffer.append(record)?;
        self.stats.records_processed += 1;
        Ok(())
    }

    /// Open → Idle: seal, upload, clean up.
    ///
    /// On a seal or transfer failure the scratch file is kept and returned
    /// inside `SinkError::Seal` or `SinkError::Transfer`.
    pub async fn process_batch(&mut self) -> Result<BatchOutcome, SinkError> {
        let context = self.active.take().ok_or_else(|| SinkError::NoActiveBatch {
            stream: self.stream.clone(),
        })?;

        let BatchContext {
            batch_id,
            key,
            buffer,
        } = context;
        let sealed = SealedBatch {
            stream: self.stream.clone(),
            batch_id,
            key,
            scratch_path: buffer.path().to_path_buf(),
            records: buffer.records_written(),
            bytes: buffer.bytes_written(),
        };

        match buffer.close() {
            Ok(closed) => debug_assert_eq!(
                closed.bytes, sealed.bytes,
                "Postcondition: close must not change the byte count"
            ),
            Err(SinkError::LocalIo { source, .. }) => {
                warn!(
                    stream = %self.stream,
                    batch_id = %sealed.batch_id,
                    scratch = %sealed.scratch_path.display(),
                    error = %source,
                    "scratch file could not be sealed, kept for retry"
                );
                return Err(SinkError::Seal {
                    batch: sealed,
                    source,
                });
            }
            Err(other) => return Err(other),
        }
        self.deliver(sealed).await
    }

    /// Upload a batch sealed by an earlier, failed `process_batch`
    pub async fn retry_upload(&mut self, batch: SealedBatch) -> Result<BatchOutcome, SinkError> {
        debug_assert_eq!(batch.stream, self.stream, "Precondition: batch belongs to this stream");
        self.deliver(batch).await
    }

    async fn deliver(&mut self, sealed: SealedBatch) -> Result<BatchOutcome, SinkError> {
        let bucket = match (self.config.s3_bucket.as_deref(), self.config.local_only) {
            (Some(bucket), _) => bucket.to_string(),
            (None, true) => {
                warn!(
                    stream = %self.stream,
                    batch_id = %sealed.batch_id,
                    scratch = %sealed.scratch_path.display(),
                    "no bucket configured (local_only), upload skipped and scratch file kept"
                );
                self.stats.batches_skipped += 1;
                return Ok(BatchOutcome {
                    batch: sealed,
                    bucket: None,
                    disposition: Disposition::SkippedLocalOnly,
                });
            }
            (None, false) => {
                return Err(SinkError::Configuration(format!(
                    "s3_bucket is not configured; batch {} kept at {}",
                    sealed.batch_id,
                    sealed.scratch_path.display()
                )))
            }
        };

        let body = tokio::fs::read(&sealed.scratch_path)
            .await
            .map_err(|e| SinkError::local_io(LocalOp::Read, &sealed.scratch_path, e))?;
        let size = body.len() as u64;
        if size != sealed.bytes {
            let source = IoError::new(
                ErrorKind::UnexpectedEof,
                format!("scratch file holds {} bytes, {} were written", size, sealed.bytes),
            );
            return Err(SinkError::Seal {
                batch: sealed,
                source,
            });
        }
        let destination = format!("s3://{}/{}", bucket, sealed.key);

        if let Err(source) = self
            .store
            .put_object(&bucket, &sealed.key, Bytes::from(body))
            .await
        {
            self.stats.upload_failures += 1;
            warn!(
                stream = %self.stream,
                batch_id = %sealed.batch_id,
                destination = %destination,
                error = %source,
                "batch upload failed, scratch file kept"
            );
            return Err(SinkError::Transfer {
                batch: sealed,
                source,
            });
        }

        self.stats.batches_uploaded += 1;
        self.stats.bytes_uploaded += size;
        info!(
            stream = %self.stream,
            batch_id = %sealed.batch_id,
            records = sealed.records,
            bytes = size,
            source = %sealed.scratch_path.display(),
            destination = %destination,
            "batch uploaded"
        );

        let disposition = match tokio::fs::remove_file(&sealed.scratch_path).await {
            Ok(()) => Disposition::Uploaded,
            Err(e) if e.kind() == ErrorKind::NotFound => Disposition::Uploaded,
            Err(e) => {
                self.stats.cleanup_failures += 1;
                error!(
                    stream = %self.stream,
                    batch_id = %sealed.batch_id,
                    path = %sealed.scratch_path.display(),
                    error = %e,
                    "batch uploaded but scratch file could not be deleted"
                );
                Disposition::UploadedScratchRetained
            }
        };

        Ok(BatchOutcome {
            batch: sealed,
            bucket: Some(bucket),
            disposition,
        })
    }
}

/// A name that joins onto a directory without leaving it
fn is_plain_component(name: &str) -> bool {
    if name.contains(['/', '\\', '\0']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::object_store::{InMemoryObjectStore, PutFuture};
    use crate::sink::simulated_store::{SimulatedObjectStore, SimulatedStoreConfig};
    use serde_json::json;

    fn controller(
        dir: &Path,
        store: Arc<dyn ObjectStore>,
    ) -> BatchController {
        let config = SinkConfig {
            s3_prefix: Some("p".to_string()),
            ..SinkConfig::for_bucket("bucket", dir)
        };
        BatchController::new("s", Arc::new(config), store)
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryObjectStore::new();
        let mut ctl = controller(dir.path(), Arc::new(store.clone()));

        let scratch = ctl.start_batch("123").unwrap().scratch_path().to_path_buf();
        assert_eq!(scratch, dir.path().join("s_123.jsonl"));
        assert!(ctl.is_open());

        ctl.process_record(&json!({"a": 1})).unwrap();
        ctl.process_record(&json!({"b": 2})).unwrap();
        assert_eq!(ctl.record_count(), 2);

        let outcome = ctl.process_batch().await.unwrap();
        assert_eq!(outcome.disposition, Disposition::Uploaded);
        assert_eq!(outcome.batch.key, "p/s/s_123.jsonl");
        assert_eq!(outcome.batch.records, 2);
        assert!(!ctl.is_open());
        assert!(!scratch.exists());

        let body = store.get("bucket", "p/s/s_123.jsonl").unwrap();
        assert_eq!(&body[..], b"{\"a\": 1}\n{\"b\": 2}\n");
        assert_eq!(ctl.stats().batches_uploaded, 1);
        assert_eq!(ctl.stats().bytes_uploaded, 18);
    }

    #[tokio::test]
    async fn test_empty_batch_uploads_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryObjectStore::new();
        let mut ctl = controller(dir.path(), Arc::new(store.clone()));

        ctl.start_batch("0").unwrap();
        let outcome = ctl.process_batch().await.unwrap();

        assert_eq!(outcome.batch.records, 0);
        assert!(store.get("bucket", "p/s/s_0.jsonl").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctl = controller(dir.path(), Arc::new(InMemoryObjectStore::new()));

        ctl.start_batch("1").unwrap();
        let err = ctl.start_batch("2").unwrap_err();

        assert!(matches!(err, SinkError::BatchAlreadyOpen { ref batch_id, .. } if batch_id == "1"));
        assert_eq!(ctl.context().unwrap().batch_id(), "1");
    }

    #[tokio::test]
    async fn test_record_without_batch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctl = controller(dir.path(), Arc::new(InMemoryObjectStore::new()));

        assert!(matches!(
            ctl.process_record(&json!({"a": 1})),
            Err(SinkError::NoActiveBatch { .. })
        ));
        assert!(matches!(
            ctl.process_batch().await,
            Err(SinkError::NoActiveBatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_records_beyond_max_size_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let config = SinkConfig {
            max_size: 2,
            ..SinkConfig::for_bucket("bucket", dir.path())
        };
        let mut ctl = BatchController::new("s", Arc::new(config), Arc::new(InMemoryObjectStore::new()));

        ctl.start_batch("1").unwrap();
        ctl.process_record(&json!({"n": 1})).unwrap();
        assert!(!ctl.is_full());
        ctl.process_record(&json!({"n": 2})).unwrap();
        assert!(ctl.is_full());
        ctl.process_record(&json!({"n": 3})).unwrap();

        assert_eq!(ctl.process_batch().await.unwrap().batch.records, 3);
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_scratch_file_and_retry_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let memory = InMemoryObjectStore::new();
        let store = Arc::new(SimulatedObjectStore::new(
            memory.clone(),
            7,
            SimulatedStoreConfig::no_faults(),
        ));
        store.force_failures(1);
        let mut ctl = controller(dir.path(), store.clone());

        ctl.start_batch("9").unwrap();
        ctl.process_record(&json!({"a": 1})).unwrap();
        let err = ctl.process_batch().await.unwrap_err();

        let sealed = err.sealed_batch().cloned().unwrap();
        assert_eq!(std::fs::read(&sealed.scratch_path).unwrap(), b"{\"a\": 1}\n");
        assert!(memory.is_empty());
        assert!(!ctl.is_open());
        assert_eq!(ctl.stats().upload_failures, 1);

        let outcome = ctl.retry_upload(sealed.clone()).await.unwrap();
        assert_eq!(outcome.disposition, Disposition::Uploaded);
        assert!(!sealed.scratch_path.exists());
        assert_eq!(&memory.get("bucket", &sealed.key).unwrap()[..], b"{\"a\": 1}\n");
    }

    #[tokio::test]
    async fn test_local_only_skips_upload() {
        let dir = tempfile::tempdir().unwrap();
        let config = SinkConfig {
            local_only: true,
            scratch_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let store = InMemoryObjectStore::new();
        let mut ctl = BatchController::new("s", Arc::new(config), Arc::new(store.clone()));

        ctl.start_batch("1").unwrap();
        ctl.process_record(&json!({"a": 1})).unwrap();
        let outcome = ctl.process_batch().await.unwrap();

        assert_eq!(outcome.disposition, Disposition::SkippedLocalOnly);
        assert!(!outcome.is_delivered());
        assert!(outcome.batch.scratch_path.exists());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_bucket_without_local_only_fails_before_upload() {
        let dir = tempfile::tempdir().unwrap();
        let config = SinkConfig {
            scratch_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let store = InMemoryObjectStore::new();
        let mut ctl = BatchController::new("s", Arc::new(config), Arc::new(store.clone()));

        ctl.start_batch("1").unwrap();
        let err = ctl.process_batch().await.unwrap_err();

        assert!(matches!(err, SinkError::Configuration(_)));
        assert!(dir.path().join("s_1.jsonl").exists());
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_scratch_path_uses_template_filename() {
        let dir = tempfile::tempdir().unwrap();
        let config = SinkConfig {
            path_template: Some("out/{stream_name}".to_string()),
            filename_prefix: Some("part".to_string()),
            ..SinkConfig::for_bucket("bucket", dir.path())
        };
        let ctl = BatchController::new("s", Arc::new(config), Arc::new(InMemoryObjectStore::new()));

        assert_eq!(ctl.scratch_path_for("5").unwrap(), dir.path().join("part-5.jsonl"));
        assert_eq!(ctl.key_for("5"), "out/s/part-5.jsonl");
    }

    /// Stores the object, then turns the scratch file into a non-empty directory
    struct ScratchSwapStore {
        inner: InMemoryObjectStore,
        scratch: PathBuf,
    }

    impl ObjectStore for ScratchSwapStore {
        fn put_object<'a>(&'a self, bucket: &'a str, key: &'a str, body: Bytes) -> PutFuture<'a> {
            Box::pin(async move {
                self.inner.put_object(bucket, key, body).await?;
                std::fs::remove_file(&self.scratch).unwrap();
                std::fs::create_dir(&self.scratch).unwrap();
                std::fs::write(self.scratch.join("keep"), b"x").unwrap();
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_cleanup_failure_after_upload_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let memory = InMemoryObjectStore::new();
        let store = ScratchSwapStore {
            inner: memory.clone(),
            scratch: dir.path().join("s_1.jsonl"),
        };
        let mut ctl = controller(dir.path(), Arc::new(store));

        ctl.start_batch("1").unwrap();
        ctl.process_record(&json!({"a": 1})).unwrap();
        let outcome = ctl.process_batch().await.unwrap();

        assert_eq!(outcome.disposition, Disposition::UploadedScratchRetained);
        assert!(outcome.is_delivered());
        assert_eq!(ctl.stats().cleanup_failures, 1);
        assert_eq!(ctl.stats().batches_uploaded, 1);
        assert_eq!(&memory.get("bucket", "p/s/s_1.jsonl").unwrap()[..], b"{\"a\": 1}\n");
        assert!(dir.path().join("s_1.jsonl").is_dir());
    }

    #[tokio::test]
    async fn test_truncated_scratch_file_is_not_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        let memory = InMemoryObjectStore::new();
        let store = Arc::new(SimulatedObjectStore::new(
            memory.clone(),
            5,
            SimulatedStoreConfig::no_faults(),
        ));
        store.force_failures(1);
        let mut ctl = controller(dir.path(), store);

        ctl.start_batch("t").unwrap();
        ctl.process_record(&json!({"a": 1})).unwrap();
        let sealed = ctl.process_batch().await.unwrap_err().sealed_batch().cloned().unwrap();
        std::fs::write(&sealed.scratch_path, b"{\"a\"").unwrap();

        let err = ctl.retry_upload(sealed.clone()).await.unwrap_err();
        assert!(matches!(err, SinkError::Seal { ref batch, .. } if *batch == sealed));
        assert!(memory.is_empty());
        assert!(sealed.scratch_path.exists());
        assert_eq!(ctl.stats().batches_uploaded, 0);
    }

    #[tokio::test]
    async fn test_stream_name_cannot_escape_scratch_dir() {
        let root = tempfile::tempdir().unwrap();
        let scratch = root.path().join("scratch");
        let store = InMemoryObjectStore::new();

        for stream in ["../x", "a/b", "..", ".", ""] {
            let config = SinkConfig::for_bucket("bucket", &scratch);
            let mut ctl = BatchController::new(stream, Arc::new(config), Arc::new(store.clone()));
            let err = ctl.start_batch("1").unwrap_err();
            assert!(matches!(err, SinkError::InvalidStreamName { .. }), "stream {:?}", stream);
            assert!(!ctl.is_open());
        }
        assert!(!root.path().join("x_1.jsonl").exists());
        assert!(!scratch.exists());
    }
}
