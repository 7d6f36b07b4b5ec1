//! Simulated Object Store with Fault Injection
//!
//! DST-compatible wrapper that injects put failures from a seeded RNG, so a
//! failing run can be replayed from its seed.

use crate::sink::object_store::{ObjectStore, ObjectStoreError, PutFuture};
use bytes::Bytes;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability of a generic put failure
    pub put_fail_prob: f64,
    /// Probability of a timeout
    pub timeout_prob: f64,
    /// Probability of an access-denied rejection
    pub permission_denied_prob: f64,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.05,           // 5%
            timeout_prob: 0.02,            // 2%
            permission_denied_prob: 0.01,  // 1%
            latency_range_us: (0, 500),    // up to 0.5ms
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.25,
            timeout_prob: 0.1,
            permission_denied_prob: 0.05,
            latency_range_us: (0, 2_000),
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.0,
            timeout_prob: 0.0,
            permission_denied_prob: 0.0,
            latency_range_us: (0, 0),
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedStoreStats {
    pub put_attempts: u64,
    pub put_failures: u64,
    pub timeouts: u64,
    pub permission_denied: u64,
    pub forced_failures: u64,
}

impl SimulatedStoreStats {
    pub fn total_failures(&self) -> u64 {
        self.put_failures + self.timeouts + self.permission_denied + self.forced_failures
    }
}

struct SimulatedStoreInner {
    rng: ChaCha8Rng,
    stats: SimulatedStoreStats,
    forced_failures: u64,
}

enum Fault {
    Forced,
    Timeout,
    PermissionDenied,
    PutFail,
}

/// Simulated object store that wraps another store and injects faults
pub struct SimulatedObjectStore<S: ObjectStore> {
    inner_store: S,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedStoreInner>>,
}

impl<S: ObjectStore> SimulatedObjectStore<S> {
    /// Create a new simulated store seeded with `seed`
    pub fn new(inner_store: S, seed: u64, config: SimulatedStoreConfig) -> Self {
        SimulatedObjectStore {
            inner_store,
            config,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: SimulatedStoreStats::default(),
                forced_failures: 0,
            })),
        }
    }

    /// Make the next `count` puts fail regardless of probabilities
    pub fn force_failures(&self, count: u64) {
        self.state.lock().forced_failures = count;
    }

    /// Get current statistics
    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    /// Reset statistics
    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedStoreStats::default();
    }

    /// Roll the dice for one put. Holds the lock only for the rolls.
    fn roll(&self) -> (Option<Fault>, u64) {
        let mut s = self.state.lock();
        s.stats.put_attempts += 1;

        let fault = if s.forced_failures > 0 {
            s.forced_failures -= 1;
            s.stats.forced_failures += 1;
            Some(Fault::Forced)
        } else if s.rng.gen_bool(self.config.timeout_prob) {
            s.stats.timeouts += 1;
            Some(Fault::Timeout)
        } else if s.rng.gen_bool(self.config.permission_denied_prob) {
            s.stats.permission_denied += 1;
            Some(Fault::PermissionDenied)
        } else if s.rng.gen_bool(self.config.put_fail_prob) {
            s.stats.put_failures += 1;
            Some(Fault::PutFail)
        } else {
            None
        };

        let (min, max) = self.config.latency_range_us;
        let latency_us = if max > min {
            s.rng.gen_range(min..max)
        } else {
            min
        };
        (fault, latency_us)
    }
}

impl<S: ObjectStore> ObjectStore for SimulatedObjectStore<S> {
    fn put_object<'a>(&'a self, bucket: &'a str, key: &'a str, body: Bytes) -> PutFuture<'a> {
        Box::pin(async move {
            let (fault, latency_us) = self.roll();

            if latency_us > 0 {
                tokio::time::sleep(std::time::Duration::from_micros(latency_us)).await;
            }

            match fault {
                Some(Fault::Forced) | Some(Fault::PutFail) => {
                    Err(ObjectStoreError::Network("simulated put failure".to_string()))
                }
                Some(Fault::Timeout) => {
                    Err(ObjectStoreError::Timeout("simulated timeout".to_string()))
                }
                Some(Fault::PermissionDenied) => Err(ObjectStoreError::PermissionDenied(
                    format!("simulated access denied for {}/{}", bucket, key),
                )),
                None => self.inner_store.put_object(bucket, key, body).await,
            }
        })
    }
}
