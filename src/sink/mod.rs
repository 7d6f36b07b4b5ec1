//! JSON Lines Batch Sink
//!
//! Buffers records of one stream into a local scratch file and uploads each
//! full batch to object storage as a single newline-delimited JSON object.
//!
//! ## Architecture
//!
//! ```text
//! record → BatchController → BatchBuffer (scratch .jsonl)
//!                │
//!          process_batch
//!                ↓
//!   close → read back → ObjectStore::put_object → delete scratch
//! ```
//!
//! ## Key Features
//!
//! - **No partial state**: scratch file is deleted only after the put succeeds
//! - **Recoverable failures**: a failed upload keeps the scratch file and
//!   returns a `SealedBatch` that can be re-uploaded
//! - **Deterministic keys**: prefix + hive partitions, or path templates
//! - **Shared client**: one `Arc<dyn ObjectStore>` across all streams

pub mod batch_buffer;
pub mod config;
pub mod controller;
pub mod dst;
pub mod error;
pub mod json;
pub mod key_builder;
pub mod object_store;
#[cfg(feature = "s3")]
pub mod s3_store;
pub mod simulated_store;

pub use batch_buffer::{BatchBuffer, ClosedBuffer};
pub use config::{
    HivePartition, ObjectStoreType, S3Config, SinkConfig, DEFAULT_MAX_RECORD_AGE_SECS, DEFAULT_MAX_SIZE,
};
pub use controller::{
    BatchContext, BatchController, BatchOutcome, ControllerStats, Disposition, SealedBatch,
};
pub use dst::{
    run_dst_batch, summarize_batch, BatchDSTConfig, BatchDSTHarness, BatchDSTResult,
};
pub use error::{LocalOp, SinkError};
pub use json::{encode_line, PipelineFormatter};
pub use key_builder::{build_filename, build_key, prefixed_key, render_template, KeyScheme};
pub use object_store::{InMemoryObjectStore, LocalFsObjectStore, ObjectStore, ObjectStoreError};
#[cfg(feature = "s3")]
pub use s3_store::S3ObjectStore;
pub use simulated_store::{SimulatedObjectStore, SimulatedStoreConfig, SimulatedStoreStats};

use std::sync::Arc;

/// Build the object store selected by the configuration
pub fn create_store(config: &SinkConfig) -> Result<Arc<dyn ObjectStore>, SinkError> {
    match config.store_type {
        ObjectStoreType::LocalFs => {
            let path = config.local_store_path.clone().ok_or_else(|| {
                SinkError::Configuration("local_store_path is required for local_fs".to_string())
            })?;
            let store = LocalFsObjectStore::new(path);
            if let Some(bucket) = &config.s3_bucket {
                store.create_bucket(bucket).map_err(|e| {
                    SinkError::Configuration(format!("cannot create local bucket {}: {}", bucket, e))
                })?;
            }
            Ok(Arc::new(store))
        }
        #[cfg(feature = "s3")]
        ObjectStoreType::S3 => Ok(Arc::new(S3ObjectStore::new(config.s3.clone()))),
        #[cfg(not(feature = "s3"))]
        ObjectStoreType::S3 => Err(SinkError::Configuration(
            "built without the `s3` feature; use store_type = \"local_fs\"".to_string(),
        )),
    }
}
