//! Deterministic Simulation Testing for the Batch Sink
//!
//! Shadow-state harness that drives several stream controllers against a
//! fault-injecting object store and checks the upload-then-cleanup contract:
//! - Deterministic random workload generation
//! - Fault injection at the object store layer
//! - Invariant checking against the expected bytes of every batch
//! - Seed-based reproducibility for debugging
//!
//! ## Design (FoundationDB-style DST with shadow state)
//!
//! ```text
//! for seed in 0..100 {
//!     let harness = BatchDSTHarness::new(BatchDSTConfig::chaos(seed), dir);
//!     harness.run(500).await;
//!     harness.drain().await;
//!     harness.check_invariants();  // violations carry the seed
//! }
//! ```

use crate::sink::config::{HivePartition, SinkConfig};
use crate::sink::controller::{BatchController, SealedBatch};
use crate::sink::error::SinkError;
use crate::sink::json::encode_line;
use crate::sink::object_store::InMemoryObjectStore;
use crate::sink::simulated_store::{SimulatedObjectStore, SimulatedStoreConfig, SimulatedStoreStats};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DST_BUCKET: &str = "dst-bucket";

/// Configuration for batch sink DST
#[derive(Debug, Clone)]
pub struct BatchDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Object store fault configuration
    pub store_config: SimulatedStoreConfig,
    /// Number of concurrent streams
    pub streams: usize,
    /// Records per batch before the driver flushes
    pub max_size: usize,
    /// Probability of an early flush instead of a record
    pub flush_probability: f64,
    /// Upload attempts per failed batch during `retry_failed`
    pub retry_attempts: usize,
}

impl Default for BatchDSTConfig {
    fn default() -> Self {
        BatchDSTConfig {
            seed: 0,
            store_config: SimulatedStoreConfig::default(),
            streams: 3,
            max_size: 25,
            flush_probability: 0.05,
            retry_attempts: 3,
        }
    }
}

impl BatchDSTConfig {
    pub fn new(seed: u64) -> Self {
        BatchDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Calm mode - no fault injection
    pub fn calm(seed: u64) -> Self {
        BatchDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::no_faults(),
            ..Default::default()
        }
    }

    /// Moderate fault injection
    pub fn moderate(seed: u64) -> Self {
        BatchDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::default(),
            ..Default::default()
        }
    }

    /// Chaos mode - aggressive fault injection, small batches
    pub fn chaos(seed: u64) -> Self {
        BatchDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::high_chaos(),
            max_size: 8,
            flush_probability: 0.1,
            ..Default::default()
        }
    }
}

/// Result of a DST run
#[derive(Debug, Clone, Default)]
pub struct BatchDSTResult {
    pub seed: u64,
    pub total_operations: u64,
    pub records_written: u64,
    pub batches_delivered: u64,
    pub batches_failed: u64,
    pub retries: u64,
    pub store_stats: SimulatedStoreStats,
    pub invariant_violations: Vec<String>,
}

impl BatchDSTResult {
    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "seed={} ops={} records={} delivered={} failed={} retries={} store_failures={} violations={}",
            self.seed,
            self.total_operations,
            self.records_written,
            self.batches_delivered,
            self.batches_failed,
            self.retries,
            self.store_stats.total_failures(),
            self.invariant_violations.len()
        )
    }
}

struct StreamState {
    controller: BatchController,
    /// Shadow copy of the open batch's scratch file
    pending: Vec<u8>,
    next_batch: u64,
    next_record: u64,
}

struct FailedBatch {
    stream_index: usize,
    batch: SealedBatch,
    expected: Vec<u8>,
}

/// DST harness for stream controllers sharing one faulty store
pub struct BatchDSTHarness {
    config: BatchDSTConfig,
    rng: ChaCha8Rng,
    memory: InMemoryObjectStore,
    store: Arc<SimulatedObjectStore<InMemoryObjectStore>>,
    streams: Vec<StreamState>,
    delivered: Vec<(SealedBatch, Vec<u8>)>,
    failed: Vec<FailedBatch>,
    result: BatchDSTResult,
}

impl BatchDSTHarness {
    /// Build a harness keeping scratch files under `scratch_dir`
    pub fn new(config: BatchDSTConfig, scratch_dir: PathBuf) -> Self {
        let memory = InMemoryObjectStore::with_buckets([DST_BUCKET]);
        let store = Arc::new(SimulatedObjectStore::new(
            memory.clone(),
            config.seed,
            config.store_config.clone(),
        ));

        let sink_config = Arc::new(SinkConfig {
            s3_prefix: Some("dst".to_string()),
            hive_partitions: vec![HivePartition::new("seed", config.seed.to_string())],
            max_size: config.max_size,
            ..SinkConfig::for_bucket(DST_BUCKET, scratch_dir)
        });

        let streams = (0..config.streams)
            .map(|i| StreamState {
                controller: BatchController::new(
                    format!("stream_{}", i),
                    Arc::clone(&sink_config),
                    store.clone(),
                ),
                pending: Vec::new(),
                next_batch: 0,
                next_record: 0,
            })
            .collect();

        BatchDSTHarness {
            rng: ChaCha8Rng::seed_from_u64(config.seed ^ 0x5eed),
            result: BatchDSTResult {
                seed: config.seed,
                ..Default::default()
            },
            config,
            memory,
            store,
            streams,
            delivered: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Run `operations` random operations
    pub async fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            self.step().await;
        }
    }

    async fn step(&mut self) {
        self.result.total_operations += 1;
        let index = self.rng.gen_range(0..self.streams.len());

        if self.rng.gen_bool(self.config.flush_probability) {
            if self.streams[index].controller.is_open() {
                self.flush(index).await;
            }
            return;
        }

        self.write_record(index);
        if self.streams[index].controller.is_full() {
            self.flush(index).await;
        }
    }

    fn write_record(&mut self, index: usize) {
        let value: u32 = self.rng.gen();
        let state = &mut self.streams[index];

        if !state.controller.is_open() {
            let batch_id = format!("{}-{}", self.config.seed, state.next_batch);
            state.next_batch += 1;
            if let Err(e) = state.controller.start_batch(batch_id) {
                self.result
                    .invariant_violations
                    .push(format!("seed {}: start_batch failed: {}", self.config.seed, e));
                return;
            }
        }

        let record = json!({
            "stream": state.controller.stream(),
            "seq": state.next_record,
            "value": value,
            "tags": ["dst", "naïve"],
        });
        state.next_record += 1;

        match (state.controller.process_record(&record), encode_line(&record)) {
            (Ok(()), Ok(line)) => {
                state.pending.extend_from_slice(&line);
                self.result.records_written += 1;
            }
            (Err(e), _) => self
                .result
                .invariant_violations
                .push(format!("seed {}: process_record failed: {}", self.config.seed, e)),
            (_, Err(e)) => self
                .result
                .invariant_violations
                .push(format!("seed {}: shadow encode failed: {}", self.config.seed, e)),
        }
    }

    async fn flush(&mut self, index: usize) {
        let state = &mut self.streams[index];
        let expected = std::mem::take(&mut state.pending);

        match state.controller.process_batch().await {
            Ok(outcome) if outcome.is_delivered() => {
                self.result.batches_delivered += 1;
                self.delivered.push((outcome.batch, expected));
            }
            Ok(outcome) => self.result.invariant_violations.push(format!(
                "seed {}: batch {} not delivered: {:?}",
                self.config.seed, outcome.batch.batch_id, outcome.disposition
            )),
            Err(SinkError::Transfer { batch, .. }) => {
                self.result.batches_failed += 1;
                self.failed.push(FailedBatch {
                    stream_index: index,
                    batch,
                    expected,
                });
            }
            Err(e) => self
                .result
                .invariant_violations
                .push(format!("seed {}: process_batch failed: {}", self.config.seed, e)),
        }
    }

    /// Flush every open batch
    pub async fn drain(&mut self) {
        for index in 0..self.streams.len() {
            if self.streams[index].controller.is_open() {
                self.flush(index).await;
            }
        }
    }

    /// Re-upload failed batches from their scratch files
    pub async fn retry_failed(&mut self) {
        let failed = std::mem::take(&mut self.failed);

        for entry in failed {
            let FailedBatch {
                stream_index,
                mut batch,
                expected,
            } = entry;
            let mut delivered = false;

            for _ in 0..self.config.retry_attempts {
                self.result.retries += 1;
                let controller = &mut self.streams[stream_index].controller;
                match controller.retry_upload(batch.clone()).await {
                    Ok(outcome) => {
                        self.result.batches_delivered += 1;
                        self.result.batches_failed -= 1;
                        self.delivered.push((outcome.batch, expected.clone()));
                        delivered = true;
                        break;
                    }
                    Err(SinkError::Transfer { batch: again, .. }) => batch = again,
                    Err(e) => {
                        self.result
                            .invariant_violations
                            .push(format!("seed {}: retry failed: {}", self.config.seed, e));
                        break;
                    }
                }
            }

            if !delivered {
                self.failed.push(FailedBatch {
                    stream_index,
                    batch,
                    expected,
                });
            }
        }
    }

    /// Check the upload-then-cleanup invariants
    pub fn check_invariants(&mut self) {
        let seed = self.config.seed;
        let mut violations = Vec::new();

        for (batch, expected) in &self.delivered {
            match self.memory.get(DST_BUCKET, &batch.key) {
                Some(body) if body.as_ref() == expected.as_slice() => {}
                Some(_) => violations.push(format!(
                    "seed {}: object {} differs from written records",
                    seed, batch.key
                )),
                None => violations.push(format!(
                    "seed {}: delivered batch {} missing from store",
                    seed, batch.key
                )),
            }
            if batch.scratch_path.exists() {
                violations.push(format!(
                    "seed {}: scratch file {} survived a successful upload",
                    seed,
                    batch.scratch_path.display()
                ));
            }
        }

        for failed in &self.failed {
            match std::fs::read(&failed.batch.scratch_path) {
                Ok(data) if data == failed.expected => {}
                Ok(_) => violations.push(format!(
                    "seed {}: scratch file {} changed after failed upload",
                    seed,
                    failed.batch.scratch_path.display()
                )),
                Err(e) => violations.push(format!(
                    "seed {}: scratch file {} lost after failed upload: {}",
                    seed,
                    failed.batch.scratch_path.display(),
                    e
                )),
            }
            if self.memory.get(DST_BUCKET, &failed.batch.key).is_some() {
                violations.push(format!(
                    "seed {}: failed batch {} is visible in the store",
                    seed, failed.batch.key
                ));
            }
        }

        if self.memory.len() != self.delivered.len() {
            violations.push(format!(
                "seed {}: store has {} objects, {} batches delivered",
                seed,
                self.memory.len(),
                self.delivered.len()
            ));
        }

        self.result.store_stats = self.store.stats();
        self.result.invariant_violations.extend(violations);
    }

    /// Failed batches still waiting for a successful upload
    pub fn pending_failures(&self) -> usize {
        self.failed.len()
    }

    pub fn result(&self) -> &BatchDSTResult {
        &self.result
    }
}

/// Run one full scenario per seed, each in its own scratch directory
pub async fn run_dst_batch(
    make_config: fn(u64) -> BatchDSTConfig,
    seeds: std::ops::Range<u64>,
    operations: usize,
    scratch_root: &Path,
) -> Vec<BatchDSTResult> {
    let mut results = Vec::new();

    for seed in seeds {
        let mut harness =
            BatchDSTHarness::new(make_config(seed), scratch_root.join(format!("seed-{}", seed)));
        harness.run(operations).await;
        harness.drain().await;
        harness.retry_failed().await;
        harness.check_invariants();
        results.push(harness.result().clone());
    }

    results
}

/// One-line summary over many runs
pub fn summarize_batch(results: &[BatchDSTResult]) -> String {
    let failed_runs = results.iter().filter(|r| !r.is_success()).count();
    let delivered: u64 = results.iter().map(|r| r.batches_delivered).sum();
    let failed: u64 = results.iter().map(|r| r.batches_failed).sum();
    let records: u64 = results.iter().map(|r| r.records_written).sum();

    let mut summary = format!(
        "runs={} failed_runs={} records={} delivered={} undelivered={}",
        results.len(),
        failed_runs,
        records,
        delivered,
        failed
    );
    if let Some(first) = results.iter().find(|r| !r.is_success()) {
        summary.push_str(&format!(" first_failure=[{}]", first.summary()));
    }
    summary
}
