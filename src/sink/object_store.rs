//! Object Store Abstraction
//!
//! Trait-based abstraction for the one operation the sink needs from object
//! storage: a single-shot, whole-object put.
//!
//! Implementations:
//! - `InMemoryObjectStore`: For unit tests and DST
//! - `LocalFsObjectStore`: For development without a bucket service
//! - `S3ObjectStore`: For production (feature-gated)
//!
//! Implementations never retry. A failed put is reported once, as a
//! distinguishable `ObjectStoreError`, and the caller decides what to do.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::collections::HashSet;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind};
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by `ObjectStore::put_object`
pub type PutFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ObjectStoreError>> + Send + 'a>>;

/// Error type for object store operations
#[derive(Debug)]
pub enum ObjectStoreError {
    /// Bucket (or container) does not exist
    BucketNotFound(String),
    /// Credentials were accepted but the operation is not allowed
    PermissionDenied(String),
    /// Credentials missing, invalid, or expired
    Unauthenticated(String),
    /// Request did not complete within the client timeout
    Timeout(String),
    /// Connection-level failure
    Network(String),
    /// Store refused the object (invalid key, precondition, quota)
    Rejected(String),
    /// Local I/O error (filesystem-backed stores)
    Io(IoError),
    /// Other errors
    Other(String),
}

impl ObjectStoreError {
    /// Whether the same put may succeed if tried again later
    pub fn is_transient(&self) -> bool {
        matches!(self, ObjectStoreError::Timeout(_) | ObjectStoreError::Network(_))
    }
}

impl std::fmt::Display for ObjectStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectStoreError::BucketNotFound(msg) => write!(f, "Bucket not found: {}", msg),
            ObjectStoreError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            ObjectStoreError::Unauthenticated(msg) => write!(f, "Unauthenticated: {}", msg),
            ObjectStoreError::Timeout(msg) => write!(f, "Request timed out: {}", msg),
            ObjectStoreError::Network(msg) => write!(f, "Network error: {}", msg),
            ObjectStoreError::Rejected(msg) => write!(f, "Object rejected: {}", msg),
            ObjectStoreError::Io(e) => write!(f, "I/O error: {}", e),
            ObjectStoreError::Other(msg) => write!(f, "Object store error: {}", msg),
        }
    }
}

impl std::error::Error for ObjectStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ObjectStoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for ObjectStoreError {
    fn from(e: IoError) -> Self {
        match e.kind() {
            ErrorKind::PermissionDenied => ObjectStoreError::PermissionDenied(e.to_string()),
            ErrorKind::TimedOut => ObjectStoreError::Timeout(e.to_string()),
            _ => ObjectStoreError::Io(e),
        }
    }
}

/// Object store abstraction trait
///
/// Shared across stream controllers behind an `Arc`, so implementations must
/// be safe for concurrent use.
pub trait ObjectStore: Send + Sync + 'static {
    /// Put a whole object (create or overwrite) in one request
    fn put_object<'a>(&'a self, bucket: &'a str, key: &'a str, body: Bytes) -> PutFuture<'a>;
}

// ============================================================================
// InMemoryObjectStore - For tests and DST
// ============================================================================

/// In-memory object store for unit tests and deterministic simulation
///
/// Accepts any bucket by default. `with_buckets` restricts it to a fixed set,
/// so puts to other buckets fail with `BucketNotFound`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    data: Arc<RwLock<HashMap<(String, String), StoredObject>>>,
    buckets: Option<Arc<HashSet<String>>>,
    put_count: Arc<RwLock<u64>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    created_at_ms: u64,
}

impl InMemoryObjectStore {
    /// Create a new in-memory object store accepting any bucket
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that only knows the given buckets
    pub fn with_buckets<I, S>(buckets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        InMemoryObjectStore {
            buckets: Some(Arc::new(buckets.into_iter().map(Into::into).collect())),
            ..Self::default()
        }
    }

    fn now_ms() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Get an object's body (for testing)
    pub fn get(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.data
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|obj| obj.body.clone())
    }

    /// Creation timestamp of an object (Unix ms)
    pub fn created_at_ms(&self, bucket: &str, key: &str) -> Option<u64> {
        self.data
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|obj| obj.created_at_ms)
    }

    /// All keys stored in a bucket, sorted
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .data
            .read()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of successful put calls, including overwrites
    pub fn put_count(&self) -> u64 {
        *self.put_count.read()
    }

    /// Get the number of stored objects (for testing)
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if empty (for testing)
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn put_object<'a>(&'a self, bucket: &'a str, key: &'a str, body: Bytes) -> PutFuture<'a> {
        Box::pin(async move {
            if let Some(buckets) = &self.buckets {
                if !buckets.contains(bucket) {
                    return Err(ObjectStoreError::BucketNotFound(bucket.to_string()));
                }
            }
            if key.is_empty() {
                return Err(ObjectStoreError::Rejected("empty object key".to_string()));
            }

            let obj = StoredObject {
                body,
                created_at_ms: Self::now_ms(),
            };
            self.data
                .write()
                .insert((bucket.to_string(), key.to_string()), obj);
            *self.put_count.write() += 1;
            Ok(())
        })
    }
}

// ============================================================================
// LocalFsObjectStore - For development
// ============================================================================

/// Local filesystem object store
///
/// Objects land at `{base_path}/{bucket}/{key}`. A bucket is a directory that
/// must already exist, mirroring a real store where buckets are provisioned
/// out of band.
#[derive(Debug, Clone)]
pub struct LocalFsObjectStore {
    base_path: PathBuf,
}

impl LocalFsObjectStore {
    /// Create a new local filesystem object store
    pub fn new(base_path: PathBuf) -> Self {
        LocalFsObjectStore { base_path }
    }

    /// Create a bucket directory
    pub fn create_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        std::fs::create_dir_all(self.base_path.join(bucket))?;
        Ok(())
    }

    /// Get the full path for an object
    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.base_path.join(bucket).join(key)
    }

    /// Get the base path (for testing)
    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
        let escapes = Path::new(key)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(ObjectStoreError::Rejected(format!(
                "key {:?} is not a relative object path",
                key
            )));
        }
        Ok(())
    }
}

impl ObjectStore for LocalFsObjectStore {
    fn put_object<'a>(&'a self, bucket: &'a str, key: &'a str, body: Bytes) -> PutFuture<'a> {
        Box::pin(async move {
            Self::validate_key(key)?;
            let bucket_dir = self.base_path.join(bucket);
            if !bucket_dir.is_dir() {
                return Err(ObjectStoreError::BucketNotFound(bucket.to_string()));
            }

            let path = bucket_dir.join(key);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            // Write-then-rename so readers never observe a partial object
            let mut tmp_name = path.as_os_str().to_owned();
            tmp_name.push(".partial");
            let tmp_path = PathBuf::from(tmp_name);
            tokio::fs::write(&tmp_path, &body).await?;
            tokio::fs::rename(&tmp_path, &path).await?;
            Ok(())
        })
    }
}
