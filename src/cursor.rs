//! Per-shard cursor persistence.
//!
//! Progress only becomes visible through [`CursorStore::save`]; the
//! in-memory cursor and the state file may diverge between a consumed
//! entry and the following save, so a crash replays at most one entry.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error};

/// Persisted progress of one shard: where to resume in the header file,
/// how far the payload file has been consumed, and the sink accumulators
/// carried across restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardCursor {
    /// Byte position in the header file just past the last consumed newline.
    pub header_offset: u64,
    /// End byte position of the last consumed payload region.
    pub payload_offset: u64,
    /// Payload bytes accumulated since the last sink flush.
    pub acc_size: u64,
    /// Entries accumulated since the last sink flush.
    pub acc_count: u64,
}

/// Handle on the state file of one shard, `dayDir/processor-<id>.state`.
///
/// The tailer owns this file exclusively; files ending in `.state` are
/// never treated as data by discovery.
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
    temp_path: PathBuf,
}

/// State file name for a shard id.
pub fn state_file_name(shard_id: u64) -> String {
    format!("processor-{shard_id}.state")
}

impl CursorStore {
    pub fn new(day_dir: &Path, shard_id: u64) -> Self {
        let path = day_dir.join(state_file_name(shard_id));
        let temp_path = day_dir.join(format!("{}.tmp", state_file_name(shard_id)));
        Self { path, temp_path }
    }

    /// The state file path, for diagnostics.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted cursor.
    ///
    /// A missing or empty state file yields zeros (fresh start). A state
    /// file that does not parse into exactly four integers is logged and
    /// also yields zeros: the shard reprocesses from the start, and
    /// duplication downstream is preferred over a silent skip.
    pub async fn load(&self) -> Result<ShardCursor> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no state file; starting from zero");
                return Ok(ShardCursor::default());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read state file {}", self.path.display()));
            }
        };

        let line = raw.trim_end_matches('\n');
        if line.is_empty() {
            debug!(path = %self.path.display(), "empty state file; starting from zero");
            return Ok(ShardCursor::default());
        }

        match parse_state_line(line) {
            Some(cursor) => {
                debug!(
                    path = %self.path.display(),
                    header_offset = cursor.header_offset,
                    payload_offset = cursor.payload_offset,
                    "loaded cursor"
                );
                Ok(cursor)
            }
            None => {
                error!(
                    path = %self.path.display(),
                    content = line,
                    "corrupt state file; reprocessing from the start"
                );
                Ok(ShardCursor::default())
            }
        }
    }

    /// Persist the cursor: write a sibling temp file, then rename over the
    /// state file so a crash-restart observes either the prior or the new
    /// value.
    pub async fn save(&self, cursor: &ShardCursor) -> Result<()> {
        let line = format!(
            "{},{},{},{}\n",
            cursor.header_offset, cursor.payload_offset, cursor.acc_size, cursor.acc_count
        );

        fs::write(&self.temp_path, line.as_bytes())
            .await
            .with_context(|| format!("failed to write {}", self.temp_path.display()))?;

        fs::rename(&self.temp_path, &self.path).await.with_context(|| {
            format!(
                "failed to rename {} to {}",
                self.temp_path.display(),
                self.path.display()
            )
        })?;

        Ok(())
    }
}

fn parse_state_line(line: &str) -> Option<ShardCursor> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 4 {
        return None;
    }

    let mut values = [0u64; 4];
    for (slot, field) in values.iter_mut().zip(&fields) {
        *slot = field.parse().ok()?;
    }

    Some(ShardCursor {
        header_offset: values[0],
        payload_offset: values[1],
        acc_size: values[2],
        acc_count: values[3],
    })
}
