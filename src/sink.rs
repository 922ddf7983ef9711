//! Sink trigger and the object-store hand-off boundary.
//!
//! Consumed entries accumulate until either threshold trips, then the
//! whole batch is handed to the downstream [`ObjectStore`] collaborator.
//! The accumulators live in the shard cursor so progress toward the next
//! flush survives restarts.

use crate::cursor::ShardCursor;
use crate::header::HeaderRecord;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, trace};
use uuid::Uuid;

/// One consumed entry, ready for the downstream store.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    /// The seven opaque metadata fields from the header record.
    pub meta: Vec<String>,
    pub input: Vec<u8>,
    pub output: Vec<u8>,
}

/// Downstream object-store collaborator. Opaque past this boundary.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_batch(&self, shard_id: u64, reason: &str, entries: &[BatchEntry]) -> Result<()>;
}

/// Accumulates entries for one shard and flushes on the configured
/// byte/count thresholds or on request at end of day.
pub struct SinkTrigger {
    shard_id: u64,
    batch_bytes: u64,
    batch_count: u64,
    pending: Vec<BatchEntry>,
    store: Arc<dyn ObjectStore>,
}

impl SinkTrigger {
    pub fn new(shard_id: u64, batch_bytes: u64, batch_count: u64, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            shard_id,
            batch_bytes,
            batch_count,
            pending: Vec::new(),
            store,
        }
    }

    /// Consume one joined entry: validate its shape, update the cursor
    /// accumulators, and flush if a threshold is exceeded.
    pub async fn consume(
        &mut self,
        record: &HeaderRecord,
        input: Vec<u8>,
        output: Vec<u8>,
        cursor: &mut ShardCursor,
    ) -> Result<()> {
        if input.len() as u64 != record.input_size {
            bail!(
                "input buffer length {} does not match advertised input size {}",
                input.len(),
                record.input_size
            );
        }
        if output.len() as u64 != record.output_size {
            bail!(
                "output buffer length {} does not match advertised output size {}",
                output.len(),
                record.output_size
            );
        }

        cursor.acc_size = cursor
            .acc_size
            .saturating_add(record.input_size)
            .saturating_add(record.output_size);
        cursor.acc_count = cursor.acc_count.saturating_add(1);

        self.pending.push(BatchEntry {
            meta: record.meta.clone(),
            input,
            output,
        });

        if cursor.acc_size > self.batch_bytes || cursor.acc_count > self.batch_count {
            let reason = format!(
                "reached limit: size={} count={}",
                cursor.acc_size, cursor.acc_count
            );
            self.flush(&reason, cursor).await?;
        }

        Ok(())
    }

    /// Hand the pending batch to the object store and reset both
    /// accumulators. Also invoked once by the tailer on clean rollover and
    /// once on torn give-up.
    pub async fn flush(&mut self, reason: &str, cursor: &mut ShardCursor) -> Result<()> {
        if self.pending.is_empty() {
            // Loaded accumulators can be nonzero after a finished day's
            // terminal flush; only pending entries reflect what this run
            // actually has to hand off.
            debug!(shard = self.shard_id, reason, "nothing pending; skipping hand-off");
            cursor.acc_size = 0;
            cursor.acc_count = 0;
            return Ok(());
        }

        self.store
            .put_batch(self.shard_id, reason, &self.pending)
            .await
            .context("object store rejected batch")?;

        self.pending.clear();
        cursor.acc_size = 0;
        cursor.acc_count = 0;
        Ok(())
    }
}

/// Default collaborator: logs the hand-off and drops the batch.
#[derive(Debug, Default, Clone)]
pub struct LoggingStore;

#[async_trait]
impl ObjectStore for LoggingStore {
    async fn put_batch(&self, shard_id: u64, reason: &str, entries: &[BatchEntry]) -> Result<()> {
        let bytes: usize = entries
            .iter()
            .map(|entry| entry.input.len() + entry.output.len())
            .sum();
        debug!(
            shard = shard_id,
            reason,
            entry_count = entries.len(),
            bytes,
            "wrap up and save to object store"
        );
        Ok(())
    }
}

/// File-backed collaborator: each flushed batch lands as one ndjson file
/// under `output_dir/shard-<id>/`, written to a temp file and renamed.
#[derive(Debug, Clone)]
pub struct FileStore {
    output_dir: PathBuf,
}

impl FileStore {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }
}

#[async_trait]
impl ObjectStore for FileStore {
    async fn put_batch(&self, shard_id: u64, reason: &str, entries: &[BatchEntry]) -> Result<()> {
        let directory = self.output_dir.join(format!("shard-{shard_id}"));
        fs::create_dir_all(&directory)
            .await
            .with_context(|| format!("failed to create directory {}", directory.display()))?;

        let filename = format!("{}_{}.ndjson", entries.len(), Uuid::new_v4());
        let final_path = directory.join(&filename);
        let temp_path = directory.join(format!("{}.tmp", Uuid::new_v4()));

        let mut buffer = Vec::new();
        for entry in entries {
            trace!(shard = shard_id, "encoding entry for batch");
            let persisted = PersistedEntry {
                meta: &entry.meta,
                input: String::from_utf8_lossy(&entry.input).into_owned(),
                output: String::from_utf8_lossy(&entry.output).into_owned(),
                input_len: entry.input.len(),
                output_len: entry.output.len(),
            };
            let mut serialized =
                serde_json::to_vec(&persisted).context("failed to encode entry for file output")?;
            serialized.push(b'\n');
            buffer.extend_from_slice(&serialized);
        }

        fs::write(&temp_path, &buffer)
            .await
            .with_context(|| format!("failed to write {}", temp_path.display()))?;
        fs::rename(&temp_path, &final_path).await.with_context(|| {
            format!(
                "failed to rename {} to {}",
                temp_path.display(),
                final_path.display()
            )
        })?;

        debug!(
            shard = shard_id,
            reason,
            entry_count = entries.len(),
            output = %final_path.display(),
            "persisted batch to file store"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct PersistedEntry<'a> {
    meta: &'a [String],
    input: String,
    output: String,
    input_len: usize,
    output_len: usize,
}
