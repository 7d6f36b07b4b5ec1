//! S3 Object Store Implementation
//!
//! Uses the `object_store` crate from the Arrow ecosystem.
//!
//! Supports:
//! - AWS S3
//! - S3-compatible services (MinIO, LocalStack, etc.)
//! - Custom endpoints
//!
//! One client is built per bucket on first use and reused for every later
//! put. Client-side retries are disabled: a failed put is reported once.

use crate::sink::config::S3Config;
use crate::sink::object_store::{ObjectStore, ObjectStoreError, PutFuture};
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectStore as ObjectStoreTrait, RetryConfig};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// S3 Object Store for production deployments
///
/// Credentials come from the standard AWS environment:
/// - AWS_ACCESS_KEY_ID
/// - AWS_SECRET_ACCESS_KEY
/// - AWS_SESSION_TOKEN
/// - AWS_REGION (unless `S3Config::region` is set)
pub struct S3ObjectStore {
    config: S3Config,
    clients: RwLock<HashMap<String, Arc<dyn ObjectStoreTrait>>>,
}

impl S3ObjectStore {
    /// Create a new S3 object store. No connection is made until the first put.
    pub fn new(config: S3Config) -> Self {
        S3ObjectStore {
            config,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Use an existing client for `bucket` (for testing)
    pub fn with_client(self, bucket: &str, store: Arc<dyn ObjectStoreTrait>) -> Self {
        self.clients.write().insert(bucket.to_string(), store);
        self
    }

    fn client(&self, bucket: &str) -> Result<Arc<dyn ObjectStoreTrait>, ObjectStoreError> {
        if let Some(client) = self.clients.read().get(bucket) {
            return Ok(Arc::clone(client));
        }

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_retry(RetryConfig {
                max_retries: 0,
                ..Default::default()
            })
            .with_client_options(
                ClientOptions::new().with_timeout(Duration::from_secs(self.config.timeout_secs)),
            );

        if let Some(region) = &self.config.region {
            builder = builder.with_region(region);
        }

        // Use custom endpoint for S3-compatible services (MinIO)
        if let Some(endpoint) = &self.config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(self.config.allow_http || endpoint.starts_with("http://"));
        }

        let store = builder.build().map_err(|e| {
            ObjectStoreError::Other(format!("failed to create S3 client for {}: {}", bucket, e))
        })?;
        let store: Arc<dyn ObjectStoreTrait> = Arc::new(store);

        let mut clients = self.clients.write();
        let client = clients
            .entry(bucket.to_string())
            .or_insert_with(|| Arc::clone(&store));
        Ok(Arc::clone(client))
    }

    /// Convert object_store errors to ObjectStoreError
    fn map_error(bucket: &str, err: object_store::Error) -> ObjectStoreError {
        match &err {
            object_store::Error::NotFound { .. } => {
                ObjectStoreError::BucketNotFound(format!("{}: {}", bucket, err))
            }
            object_store::Error::AlreadyExists { .. }
            | object_store::Error::Precondition { .. }
            | object_store::Error::NotModified { .. } => ObjectStoreError::Rejected(err.to_string()),
            _ => classify_message(err.to_string()),
        }
    }
}

/// Classify a store error by its message (S3 error codes and HTTP status)
fn classify_message(msg: String) -> ObjectStoreError {
    let lower = msg.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["nosuchbucket", "bucket does not exist"]) {
        ObjectStoreError::BucketNotFound(msg)
    } else if has(&["invalidaccesskeyid", "signaturedoesnotmatch", "expiredtoken", "401", "unauthorized"]) {
        ObjectStoreError::Unauthenticated(msg)
    } else if has(&["accessdenied", "403", "forbidden"]) {
        ObjectStoreError::PermissionDenied(msg)
    } else if has(&["timed out", "timeout"]) {
        ObjectStoreError::Timeout(msg)
    } else if has(&["connection", "connect", "dns", "broken pipe"]) {
        ObjectStoreError::Network(msg)
    } else {
        ObjectStoreError::Other(msg)
    }
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("config", &self.config)
            .field("buckets", &self.clients.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ObjectStore for S3ObjectStore {
    fn put_object<'a>(&'a self, bucket: &'a str, key: &'a str, body: Bytes) -> PutFuture<'a> {
        Box::pin(async move {
            let client = self.client(bucket)?;
            // parse keeps the key as-is; From<&str> would percent-encode it
            let path = ObjectPath::parse(key).map_err(|e| {
                ObjectStoreError::Rejected(format!("invalid object key {}: {}", key, e))
            })?;
            client
                .put(&path, body.into())
                .await
                .map_err(|e| Self::map_error(bucket, e))?;
            Ok(())
        })
    }
}
