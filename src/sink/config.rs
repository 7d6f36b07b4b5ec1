//! Configuration for the Batch Sink
//!
//! Resolved once at startup from a JSON or TOML file, validated, then shared
//! read-only (`Arc<SinkConfig>`) by every stream controller.

use crate::sink::error::SinkError;
use crate::sink::key_builder::{KeyScheme, STREAM_NAME_PLACEHOLDER};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default maximum records per batch
pub const DEFAULT_MAX_SIZE: usize = 10_000;
/// Default age of the oldest buffered record before every batch is drained
pub const DEFAULT_MAX_RECORD_AGE_SECS: u64 = 300;
/// Default S3 request timeout
pub const DEFAULT_S3_TIMEOUT_SECS: u64 = 30;

/// One hive-style partition segment (`name=value`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HivePartition {
    pub name: String,
    pub value: String,
}

impl HivePartition {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        HivePartition {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Key segment for this partition
    pub fn segment(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Type of object store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStoreType {
    /// Amazon S3 or compatible
    #[default]
    S3,
    /// Local filesystem, one directory per bucket
    LocalFs,
}

/// S3 client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// AWS region (falls back to AWS_REGION / AWS_DEFAULT_REGION)
    pub region: Option<String>,
    /// Custom endpoint (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,
    /// Allow plain HTTP endpoints
    pub allow_http: bool,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl Default for S3Config {
    fn default() -> Self {
        S3Config {
            region: None,
            endpoint: None,
            allow_http: false,
            timeout_secs: DEFAULT_S3_TIMEOUT_SECS,
        }
    }
}

/// Main configuration for the batch sink
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Destination bucket. Required unless `local_only` is set.
    pub s3_bucket: Option<String>,
    /// Key prefix for the prefix + partitions naming scheme
    pub s3_prefix: Option<String>,
    /// Ordered hive partitions appended to every key
    pub hive_partitions: Vec<HivePartition>,
    /// Path template for the template naming scheme
    #[serde(alias = "filepath")]
    pub path_template: Option<String>,
    /// File name prefix template for the template naming scheme
    #[serde(alias = "file_naming_scheme")]
    pub filename_prefix: Option<String>,
    /// Maximum records per batch
    pub max_size: usize,
    /// Drain every open batch once the oldest has been open this long, so
    /// state checkpoints go out with interleaved streams. `None` disables.
    pub max_record_age_secs: Option<u64>,
    /// Keep `_sdc_*` pipeline metadata on records
    pub include_sdc_metadata_properties: bool,
    /// Skip uploads entirely when no bucket is configured
    pub local_only: bool,
    /// Directory holding scratch files of in-flight batches
    pub scratch_dir: PathBuf,
    /// Object store backend
    pub store_type: ObjectStoreType,
    /// Root directory for the LocalFs backend
    pub local_store_path: Option<PathBuf>,
    /// S3 client settings
    pub s3: S3Config,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig {
            s3_bucket: None,
            s3_prefix: None,
            hive_partitions: Vec::new(),
            path_template: None,
            filename_prefix: None,
            max_size: DEFAULT_MAX_SIZE,
            max_record_age_secs: Some(DEFAULT_MAX_RECORD_AGE_SECS),
            include_sdc_metadata_properties: false,
            local_only: false,
            scratch_dir: PathBuf::from("."),
            store_type: ObjectStoreType::S3,
            local_store_path: None,
            s3: S3Config::default(),
        }
    }
}

impl SinkConfig {
    /// Config uploading to `bucket`, scratch files under `scratch_dir`
    pub fn for_bucket(bucket: impl Into<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        SinkConfig {
            s3_bucket: Some(bucket.into()),
            scratch_dir: scratch_dir.into(),
            ..Default::default()
        }
    }

    /// Load and validate a config file. `.toml` files are parsed as TOML,
    /// everything else as JSON.
    pub fn from_file(path: &Path) -> Result<Self, SinkError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SinkError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;

        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);
        if is_toml {
            Self::from_toml_str(&text)
        } else {
            Self::from_json_str(&text)
        }
    }

    /// Parse and validate a JSON config
    pub fn from_json_str(text: &str) -> Result<Self, SinkError> {
        let config: SinkConfig = serde_json::from_str(text)
            .map_err(|e| SinkError::Configuration(format!("invalid JSON config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML config
    pub fn from_toml_str(text: &str) -> Result<Self, SinkError> {
        let config: SinkConfig = toml::from_str(text)
            .map_err(|e| SinkError::Configuration(format!("invalid TOML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that the controllers rely on
    pub fn validate(&self) -> Result<(), SinkError> {
        if self.max_size == 0 {
            return Err(SinkError::Configuration(
                "max_size must be a positive integer".to_string(),
            ));
        }

        match self.s3_bucket.as_deref() {
            Some("") => {
                return Err(SinkError::Configuration(
                    "s3_bucket must not be empty".to_string(),
                ))
            }
            None if !self.local_only => {
                return Err(SinkError::Configuration(
                    "s3_bucket is required unless local_only is set".to_string(),
                ))
            }
            _ => {}
        }

        for partition in &self.hive_partitions {
            let bad = |s: &str| s.is_empty() || s.contains('/');
            if bad(&partition.name) || partition.name.contains('=') || bad(&partition.value) {
                return Err(SinkError::Configuration(format!(
                    "invalid hive partition {:?}",
                    partition.segment()
                )));
            }
        }

        if self.store_type == ObjectStoreType::LocalFs && self.local_store_path.is_none() {
            return Err(SinkError::Configuration(
                "local_store_path is required for the local_fs store".to_string(),
            ));
        }

        if self.uses_template() && self.s3_prefix.is_some() {
            warn!("s3_prefix is ignored because path_template/filename_prefix is configured");
        }

        Ok(())
    }

    fn uses_template(&self) -> bool {
        self.path_template.is_some() || self.filename_prefix.is_some()
    }

    /// Naming scheme selected by which fields are present
    pub fn key_scheme(&self) -> KeyScheme {
        if self.uses_template() {
            KeyScheme::Template {
                path_template: self.path_template.clone().unwrap_or_default(),
                filename_prefix: self
                    .filename_prefix
                    .clone()
                    .unwrap_or_else(|| STREAM_NAME_PLACEHOLDER.to_string()),
            }
        } else {
            KeyScheme::Prefix {
                prefix: self.s3_prefix.clone().unwrap_or_default(),
            }
        }
    }
}
