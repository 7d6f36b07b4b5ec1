//! Singer Target Driver
//!
//! Reads Singer messages line by line and drives one `BatchController` per
//! stream through its start → record → upload hooks.
//!
//! ```text
//!  stdin ──► parse_line ──► Message
//!                             │
//!        ┌────────────────────┼──────────────────────┐
//!        ▼                    ▼                      ▼
//!     RECORD                STATE            SCHEMA / ACTIVATE_VERSION
//!        │                    │                      │
//!   controller[stream]   remember latest       register stream
//!        │                    │
//!   full? ─► process_batch    └──► emitted on stdout once every
//!                                  stream is idle (nothing buffered)
//! ```
//!
//! Once the oldest open batch is older than `max_record_age_secs`, every
//! open batch is drained so state can go out while streams interleave. At
//! end of input every open batch is drained concurrently and the final state
//! is written.

pub mod message;
pub mod metadata;

pub use message::{parse_line, Message};
pub use metadata::{add_metadata, strip_metadata, RecordMetadata, SDC_PREFIX};

use crate::sink::{encode_line, BatchController, ObjectStore, SinkConfig, SinkError};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info};
use uuid::Uuid;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum TargetError {
    /// Sink failure (configuration, local I/O or upload)
    Sink(SinkError),
    /// Input line is not a valid Singer message
    Parse {
        line_number: u64,
        source: serde_json::Error,
    },
    /// Reading input or writing state failed
    Io(std::io::Error),
}

impl std::fmt::Display for TargetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetError::Sink(e) => write!(f, "{}", e),
            TargetError::Parse {
                line_number,
                source,
            } => write!(f, "invalid message on line {}: {}", line_number, source),
            TargetError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for TargetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TargetError::Sink(e) => Some(e),
            TargetError::Parse { source, .. } => Some(source),
            TargetError::Io(e) => Some(e),
        }
    }
}

impl From<SinkError> for TargetError {
    fn from(e: SinkError) -> Self {
        TargetError::Sink(e)
    }
}

impl From<std::io::Error> for TargetError {
    fn from(e: std::io::Error) -> Self {
        TargetError::Io(e)
    }
}

// ============================================================================
// Target
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetStats {
    pub lines_read: u64,
    pub records: u64,
    pub batches_flushed: u64,
    pub states_emitted: u64,
    pub messages_ignored: u64,
}

#[derive(Debug)]
struct StreamState {
    controller: BatchController,
    batch_started_at: Option<DateTime<Utc>>,
    table_version: Option<u64>,
}

/// Routes Singer messages to per-stream batch controllers
pub struct Target {
    config: Arc<SinkConfig>,
    store: Arc<dyn ObjectStore>,
    streams: HashMap<String, StreamState>,
    latest_state: Option<Value>,
    state_pending: bool,
    stats: TargetStats,
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("streams", &self.streams.keys().collect::<Vec<_>>())
            .field("state_pending", &self.state_pending)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Target {
    /// Validate the configuration and create an idle target
    pub fn new(config: SinkConfig, store: Arc<dyn ObjectStore>) -> Result<Self, TargetError> {
        config.validate()?;
        Ok(Target {
            config: Arc::new(config),
            store,
            streams: HashMap::new(),
            latest_state: None,
            state_pending: false,
            stats: TargetStats::default(),
        })
    }

    pub fn stats(&self) -> &TargetStats {
        &self.stats
    }

    pub fn controller(&self, stream: &str) -> Option<&BatchController> {
        self.streams.get(stream).map(|s| &s.controller)
    }

    pub fn stream_names(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(String::as_str)
    }

    /// Last `STATE` value received
    pub fn latest_state(&self) -> Option<&Value> {
        self.latest_state.as_ref()
    }

    /// True when no stream has an open batch
    pub fn is_idle(&self) -> bool {
        self.streams.values().all(|s| !s.controller.is_open())
    }

    /// Process every line of `input`, then drain and write the final state
    pub async fn run<R, W>(&mut self, input: R, out: &mut W) -> Result<TargetStats, TargetError>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut lines = input.lines();
        let mut line_number = 0u64;

        while let Some(line) = lines.next_line().await? {
            line_number += 1;
            self.stats.lines_read += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let message = parse_line(line).map_err(|source| TargetError::Parse {
                line_number,
                source,
            })?;
            self.process_message(message, out).await?;
        }

        self.finish(out).await?;
        info!(
            lines = self.stats.lines_read,
            records = self.stats.records,
            batches = self.stats.batches_flushed,
            streams = self.streams.len(),
            "input exhausted, all batches drained"
        );
        Ok(self.stats.clone())
    }

    /// Handle one message
    pub async fn process_message<W: Write>(
        &mut self,
        message: Message,
        out: &mut W,
    ) -> Result<(), TargetError> {
        match message {
            Message::Schema {
                stream,
                key_properties,
                ..
            } => {
                debug!(stream = %stream, key_properties = ?key_properties, "schema received");
                self.stream_mut(&stream);
            }
            Message::Record {
                stream,
                record,
                time_extracted,
                version,
            } => {
                self.append_record(&stream, record, time_extracted.as_deref(), version)?;
                let full = self
                    .streams
                    .get(&stream)
                    .is_some_and(|s| s.controller.is_full());
                if full {
                    self.flush_stream(&stream).await?;
                    self.emit_state_if_idle(out)?;
                }
            }
            Message::State { value } => {
                self.latest_state = Some(value);
                self.state_pending = true;
                self.emit_state_if_idle(out)?;
            }
            Message::ActivateVersion { stream, version } => {
                debug!(stream = %stream, version, "table version activated");
                self.stream_mut(&stream).table_version = Some(version);
            }
            Message::Unknown => {
                self.stats.messages_ignored += 1;
                debug!("ignoring unsupported message type");
            }
        }
        self.drain_if_stale(out).await
    }

    /// Drain every open batch, then write any pending state
    pub async fn finish<W: Write>(&mut self, out: &mut W) -> Result<(), TargetError> {
        self.drain_all().await?;
        self.emit_state_if_idle(out)
    }

    /// Upload every open batch concurrently.
    ///
    /// All uploads run to completion; the first error is returned afterwards.
    pub async fn drain_all(&mut self) -> Result<(), TargetError> {
        let results = join_all(
            self.streams
                .values_mut()
                .filter(|s| s.controller.is_open())
                .map(|s| s.controller.process_batch()),
        )
        .await;

        for state in self.streams.values_mut() {
            state.batch_started_at = None;
        }

        let mut first_error = None;
        for result in results {
            match result {
                Ok(outcome) => {
                    self.stats.batches_flushed += 1;
                    debug!(
                        stream = %outcome.batch.stream,
                        batch_id = %outcome.batch.batch_id,
                        disposition = ?outcome.disposition,
                        "batch drained"
                    );
                }
                Err(e) => {
                    error!(error = %e, "batch drain failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Drain every open batch once the oldest exceeds `max_record_age_secs`
    async fn drain_if_stale<W: Write>(&mut self, out: &mut W) -> Result<(), TargetError> {
        let Some(max_age) = self.config.max_record_age_secs else {
            return Ok(());
        };
        let Some(oldest) = self.streams.values().filter_map(|s| s.batch_started_at).min() else {
            return Ok(());
        };

        let age = (Utc::now() - oldest).num_seconds();
        if age < i64::try_from(max_age).unwrap_or(i64::MAX) {
            return Ok(());
        }

        info!(
            age_secs = age,
            max_record_age_secs = max_age,
            "oldest batch reached max record age, draining all streams"
        );
        self.drain_all().await?;
        self.emit_state_if_idle(out)
    }

    fn stream_mut(&mut self, stream: &str) -> &mut StreamState {
        let config = &self.config;
        let store = &self.store;
        self.streams
            .entry(stream.to_string())
            .or_insert_with(|| {
                debug!(stream = %stream, "stream registered");
                StreamState {
                    controller: BatchController::new(stream, Arc::clone(config), Arc::clone(store)),
                    batch_started_at: None,
                    table_version: None,
                }
            })
    }

    fn append_record(
        &mut self,
        stream: &str,
        mut record: Map<String, Value>,
        time_extracted: Option<&str>,
        version: Option<u64>,
    ) -> Result<(), TargetError> {
        let include_metadata = self.config.include_sdc_metadata_properties;
        let state = self.stream_mut(stream);

        if !state.controller.is_open() {
            state.controller.start_batch(Uuid::new_v4().to_string())?;
            state.batch_started_at = Some(Utc::now());
        }

        if include_metadata {
            let received_at = Utc::now();
            add_metadata(
                &mut record,
                &RecordMetadata {
                    time_extracted,
                    received_at,
                    batched_at: state.batch_started_at.unwrap_or(received_at),
                    table_version: version.or(state.table_version),
                },
            );
        } else {
            strip_metadata(&mut record);
        }

        state.controller.process_record(&record)?;
        self.stats.records += 1;
        Ok(())
    }

    async fn flush_stream(&mut self, stream: &str) -> Result<(), TargetError> {
        let Some(state) = self.streams.get_mut(stream) else {
            return Ok(());
        };
        if !state.controller.is_open() {
            return Ok(());
        }

        let result = state.controller.process_batch().await;
        state.batch_started_at = None;
        let outcome = result?;

        self.stats.batches_flushed += 1;
        debug!(
            stream = %stream,
            batch_id = %outcome.batch.batch_id,
            records = outcome.batch.records,
            "batch reached max_size and was flushed"
        );
        Ok(())
    }

    fn emit_state_if_idle<W: Write>(&mut self, out: &mut W) -> Result<(), TargetError> {
        if !self.state_pending || !self.is_idle() {
            return Ok(());
        }

        if let Some(state) = &self.latest_state {
            let line = encode_line(state).map_err(SinkError::from)?;
            out.write_all(&line)?;
            out.flush()?;
            self.stats.states_emitted += 1;
            debug!("state emitted");
        }
        self.state_pending = false;
        Ok(())
    }
}
