//! Singer target tests
//!
//! Feed whole message streams through `Target::run` and inspect what lands
//! in the store and on the state output.

use serde_json::{json, Value};
use std::sync::Arc;
use target_s3_jsonl::sink::{
    InMemoryObjectStore, SimulatedObjectStore, SimulatedStoreConfig, SinkConfig, SinkError,
};
use target_s3_jsonl::target::{Target, TargetError};

const INPUT: &str = r#"{"type": "SCHEMA", "stream": "users", "schema": {"properties": {"id": {"type": "integer"}}}, "key_properties": ["id"]}
{"type": "RECORD", "stream": "users", "record": {"id": 1, "name": "ada"}, "time_extracted": "2024-05-01T00:00:00Z"}
{"type": "RECORD", "stream": "users", "record": {"id": 2, "name": "grace", "_sdc_received_at": "old"}}
{"type": "SCHEMA", "stream": "orders", "schema": {"properties": {}}, "key_properties": []}
{"type": "RECORD", "stream": "orders", "record": {"order": 10}}
{"type": "STATE", "value": {"bookmarks": {"users": 2, "orders": 10}}}
{"type": "RECORD", "stream": "users", "record": {"id": 3, "name": "linus"}}

{"type": "STATE", "value": {"bookmarks": {"users": 3, "orders": 10}}}
"#;

fn config(scratch: &std::path::Path, max_size: usize) -> SinkConfig {
    SinkConfig {
        s3_prefix: Some("singer".to_string()),
        max_size,
        ..SinkConfig::for_bucket("lake", scratch)
    }
}

fn objects(store: &InMemoryObjectStore, prefix: &str) -> Vec<Vec<Value>> {
    store
        .keys("lake")
        .into_iter()
        .filter(|k| k.starts_with(prefix))
        .map(|k| {
            let body = store.get("lake", &k).unwrap();
            std::str::from_utf8(&body)
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        })
        .collect()
}

#[tokio::test]
async fn test_run_writes_one_object_per_stream() {
    let dir = tempfile::tempdir().unwrap();
    let store = InMemoryObjectStore::new();
    let mut target = Target::new(config(dir.path(), 100), Arc::new(store.clone())).unwrap();
    let mut out: Vec<u8> = Vec::new();

    let stats = target.run(INPUT.as_bytes(), &mut out).await.unwrap();

    assert_eq!(stats.records, 4);
    assert_eq!(stats.batches_flushed, 2);
    assert_eq!(store.len(), 2);

    let users = objects(&store, "singer/users/users_");
    assert_eq!(users.len(), 1);
    assert_eq!(
        users[0],
        vec![
            json!({"id": 1, "name": "ada"}),
            json!({"id": 2, "name": "grace"}),
            json!({"id": 3, "name": "linus"}),
        ]
    );
    assert_eq!(objects(&store, "singer/orders/orders_")[0], vec![json!({"order": 10})]);

    // Both states arrive while batches are open; only the latest is written
    let emitted = String::from_utf8(out).unwrap();
    assert_eq!(emitted, "{\"bookmarks\": {\"users\": 3, \"orders\": 10}}\n");
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_run_flushes_at_max_size() {
    let dir = tempfile::tempdir().unwrap();
    let store = InMemoryObjectStore::new();
    let mut target = Target::new(config(dir.path(), 2), Arc::new(store.clone())).unwrap();
    let mut out: Vec<u8> = Vec::new();

    let mut input = String::new();
    for i in 0..5 {
        input.push_str(&format!(
            "{{\"type\": \"RECORD\", \"stream\": \"s\", \"record\": {{\"i\": {}}}}}\n",
            i
        ));
        if i == 1 {
            input.push_str("{\"type\": \"STATE\", \"value\": {\"at\": 1}}\n");
        }
    }

    let stats = target.run(input.as_bytes(), &mut out).await.unwrap();

    assert_eq!(stats.batches_flushed, 3);
    let mut sizes: Vec<usize> = objects(&store, "singer/s/").iter().map(Vec::len).collect();
    sizes.sort();
    assert_eq!(sizes, vec![1, 2, 2]);

    // Stream was idle right after the first flush, so state went out immediately
    assert_eq!(String::from_utf8(out).unwrap(), "{\"at\": 1}\n");
    assert_eq!(stats.states_emitted, 1);
}

#[tokio::test]
async fn test_metadata_is_added_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let store = InMemoryObjectStore::new();
    let config = SinkConfig {
        include_sdc_metadata_properties: true,
        ..config(dir.path(), 100)
    };
    let mut target = Target::new(config, Arc::new(store.clone())).unwrap();
    let input = concat!(
        r#"{"type": "ACTIVATE_VERSION", "stream": "users", "version": 12}"#,
        "\n",
        r#"{"type": "RECORD", "stream": "users", "record": {"id": 1}, "time_extracted": "2024-05-01T00:00:00Z"}"#,
        "\n",
    );

    target.run(input.as_bytes(), &mut Vec::<u8>::new()).await.unwrap();

    let users = objects(&store, "singer/users/");
    let record = users[0][0].as_object().unwrap();
    assert_eq!(record["id"], json!(1));
    assert_eq!(record["_sdc_extracted_at"], json!("2024-05-01T00:00:00Z"));
    assert_eq!(record["_sdc_table_version"], json!(12));
    assert!(record["_sdc_received_at"].is_string());
    assert!(record["_sdc_batched_at"].is_string());
    assert!(record["_sdc_sequence"].is_i64());
    assert_eq!(record["_sdc_deleted_at"], Value::Null);
}

#[tokio::test]
async fn test_malformed_line_reports_line_number() {
    let dir = tempfile::tempdir().unwrap();
    let mut target =
        Target::new(config(dir.path(), 100), Arc::new(InMemoryObjectStore::new())).unwrap();
    let input = "{\"type\": \"STATE\", \"value\": {}}\n\nnot json\n";

    let err = target.run(input.as_bytes(), &mut Vec::<u8>::new()).await.unwrap_err();
    assert!(matches!(err, TargetError::Parse { line_number: 3, .. }));
}

#[tokio::test]
async fn test_failed_upload_withholds_state_and_keeps_scratch() {
    let dir = tempfile::tempdir().unwrap();
    let memory = InMemoryObjectStore::new();
    let store = Arc::new(SimulatedObjectStore::new(
        memory.clone(),
        11,
        SimulatedStoreConfig::no_faults(),
    ));
    store.force_failures(1);
    let mut target = Target::new(config(dir.path(), 100), store).unwrap();
    let input = concat!(
        r#"{"type": "RECORD", "stream": "users", "record": {"id": 1}}"#,
        "\n",
        r#"{"type": "STATE", "value": {"n": 1}}"#,
        "\n",
    );
    let mut out: Vec<u8> = Vec::new();

    let err = target.run(input.as_bytes(), &mut out).await.unwrap_err();

    let batch = match err {
        TargetError::Sink(SinkError::Transfer { batch, .. }) => batch,
        other => panic!("expected transfer error, got {:?}", other),
    };
    assert_eq!(std::fs::read(&batch.scratch_path).unwrap(), b"{\"id\": 1}\n");
    assert!(memory.is_empty());
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_unknown_messages_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let store = InMemoryObjectStore::new();
    let mut target = Target::new(config(dir.path(), 100), Arc::new(store.clone())).unwrap();
    let input = "{\"type\": \"BATCH\", \"stream\": \"s\", \"encoding\": {}}\n";

    let stats = target.run(input.as_bytes(), &mut Vec::<u8>::new()).await.unwrap();

    assert_eq!(stats.messages_ignored, 1);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_large_numbers_are_stored_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let store = InMemoryObjectStore::new();
    let mut target = Target::new(config(dir.path(), 100), Arc::new(store.clone())).unwrap();
    let input = concat!(
        r#"{"type": "RECORD", "stream": "n", "record": {"id": 123456789012345678901234567890, "amt": 12.345678901234567890123}}"#,
        "\n",
    );

    target.run(input.as_bytes(), &mut Vec::<u8>::new()).await.unwrap();

    let keys = store.keys("lake");
    assert_eq!(keys.len(), 1);
    assert_eq!(
        &store.get("lake", &keys[0]).unwrap()[..],
        b"{\"id\": 123456789012345678901234567890, \"amt\": 12.345678901234567890123}\n"
    );
}

#[tokio::test]
async fn test_record_age_drain_checkpoints_interleaved_streams() {
    let dir = tempfile::tempdir().unwrap();
    let store = InMemoryObjectStore::new();
    let config = SinkConfig {
        max_record_age_secs: Some(0),
        ..config(dir.path(), 100)
    };
    let mut target = Target::new(config, Arc::new(store.clone())).unwrap();
    let mut out: Vec<u8> = Vec::new();

    let stats = target.run(INPUT.as_bytes(), &mut out).await.unwrap();

    // Every record is drained as soon as it lands, so neither state waits for EOF
    assert_eq!(stats.states_emitted, 2);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        concat!(
            "{\"bookmarks\": {\"users\": 2, \"orders\": 10}}\n",
            "{\"bookmarks\": {\"users\": 3, \"orders\": 10}}\n",
        )
    );
    assert_eq!(stats.batches_flushed, 4);
    assert_eq!(store.len(), 4);
}
