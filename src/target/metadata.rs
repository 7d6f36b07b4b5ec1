//! `_sdc_*` pipeline metadata on records.
//!
//! The sink core writes records as given; adding or stripping these fields
//! is the target's job, switched by `include_sdc_metadata_properties`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Prefix shared by all pipeline metadata fields
pub const SDC_PREFIX: &str = "_sdc_";

/// Values injected into a record when metadata is enabled
#[derive(Debug, Clone)]
pub struct RecordMetadata<'a> {
    pub time_extracted: Option<&'a str>,
    pub received_at: DateTime<Utc>,
    pub batched_at: DateTime<Utc>,
    pub table_version: Option<u64>,
}

fn timestamp(t: &DateTime<Utc>) -> Value {
    Value::String(t.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// Insert `_sdc_*` fields, overwriting any already present
pub fn add_metadata(record: &mut Map<String, Value>, meta: &RecordMetadata<'_>) {
    record.insert(
        "_sdc_extracted_at".to_string(),
        meta.time_extracted
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),
    );
    record.insert("_sdc_received_at".to_string(), timestamp(&meta.received_at));
    record.insert("_sdc_batched_at".to_string(), timestamp(&meta.batched_at));
    record.insert(
        "_sdc_sequence".to_string(),
        Value::from(meta.received_at.timestamp_millis()),
    );
    record.insert(
        "_sdc_table_version".to_string(),
        meta.table_version.map(Value::from).unwrap_or(Value::Null),
    );
    if !record.contains_key("_sdc_deleted_at") {
        record.insert("_sdc_deleted_at".to_string(), Value::Null);
    }
}

/// Remove every `_sdc_*` field
pub fn strip_metadata(record: &mut Map<String, Value>) {
    record.retain(|key, _| !key.starts_with(SDC_PREFIX));
}
