//! The per-shard pair tailer.
//!
//! One tailer follows one `.header`/`.payload` pair for one calendar day:
//! a single sequential poll loop that reads newly appended header lines,
//! joins each complete record to its payload region, hands the entry to
//! the sink trigger, and persists the cursor after every consumed entry.
//! Torn trailing records are retried; day rollover terminates the tailer.

use crate::cursor::{CursorStore, ShardCursor};
use crate::daypath::{date_path, differs_from_today};
use crate::header::{self, ParsedLine};
use crate::sink::SinkTrigger;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Identity of one tailer run: which pair, where, for which day.
#[derive(Debug, Clone)]
pub struct TailerSpec {
    pub shard_id: u64,
    pub base_dir: PathBuf,
    pub date: NaiveDate,
    pub header_name: String,
    pub payload_name: String,
}

/// Loop tuning, taken from the `[tailer]` config section.
#[derive(Debug, Clone, Copy)]
pub struct TailerSettings {
    pub poll_interval: Duration,
    pub max_torn_retries: u32,
}

/// Terminal outcome of a tailer, mapped onto the process exit-code
/// taxonomy consumed by supervisors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailStatus {
    /// Clean day rollover: every visible record was consumed.
    EndedSuccessfully { entries: u64 },
    /// Gave up on a torn trailing record after the day rolled over.
    EndedUnsuccessfully { entries: u64, header_offset: u64 },
    /// The header file could not be opened; retry on a later scan.
    HeaderOpenFailed,
    /// The payload file could not be opened; retry on a later scan.
    PayloadOpenFailed,
    /// Orderly shutdown on signal; the persisted cursor resumes the shard.
    Interrupted { entries: u64 },
}

impl TailStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            TailStatus::EndedSuccessfully { .. } => 0,
            TailStatus::EndedUnsuccessfully { .. } => 10,
            TailStatus::HeaderOpenFailed => 101,
            TailStatus::PayloadOpenFailed => 102,
            TailStatus::Interrupted { .. } => 130,
        }
    }
}

/// Tail one header/payload pair until day rollover, torn give-up, or
/// cancellation.
///
/// The stdout lines printed here are the machine-readable contract with
/// an external supervisor; diagnostics go through tracing instead.
pub async fn tail_pair(
    spec: TailerSpec,
    settings: TailerSettings,
    mut sink: SinkTrigger,
    cancel: CancellationToken,
) -> Result<TailStatus> {
    let day_dir = spec.base_dir.join(date_path(spec.date));
    let header_path = day_dir.join(&spec.header_name);
    let payload_path = day_dir.join(&spec.payload_name);

    let store = CursorStore::new(&day_dir, spec.shard_id);
    let mut cursor = store.load().await?;

    let header_file = match File::open(&header_path).await {
        Ok(file) => file,
        Err(err) => {
            warn!(shard = spec.shard_id, path = %header_path.display(), error = %err, "header open failed");
            println!("Error opening header file: {err}");
            return Ok(TailStatus::HeaderOpenFailed);
        }
    };
    let mut payload = match File::open(&payload_path).await {
        Ok(file) => file,
        Err(err) => {
            warn!(shard = spec.shard_id, path = %payload_path.display(), error = %err, "payload open failed");
            println!("Error opening payload file: {err}");
            return Ok(TailStatus::PayloadOpenFailed);
        }
    };
    let mut header_reader = BufReader::new(header_file);

    info!(
        shard = spec.shard_id,
        path = %header_path.display(),
        header_offset = cursor.header_offset,
        "starting tailer"
    );

    let mut entries: u64 = 0;
    let mut torn_retries: u32 = 0;
    let mut line = String::new();

    loop {
        let header_size = fs::metadata(&header_path)
            .await
            .with_context(|| format!("failed to stat {}", header_path.display()))?
            .len();

        if header_size > cursor.header_offset {
            header_reader
                .seek(SeekFrom::Start(cursor.header_offset))
                .await
                .with_context(|| format!("failed to seek {}", header_path.display()))?;
            let mut pos = cursor.header_offset;

            loop {
                line.clear();
                let consumed = header_reader
                    .read_line(&mut line)
                    .await
                    .with_context(|| format!("read error on {}", header_path.display()))?;
                if consumed == 0 {
                    break;
                }

                if !line.ends_with('\n') {
                    // Writer is mid-append; the trailing newline has not
                    // landed yet.
                    torn_retries = bump_torn_retries(torn_retries, settings.max_torn_retries);
                    info!(
                        shard = spec.shard_id,
                        header = %spec.header_name,
                        retries_left = torn_retries,
                        "header not ready"
                    );
                    break;
                }

                let record = match header::parse_line(line.trim_end_matches('\n'))
                    .with_context(|| format!("corrupt record in {}", header_path.display()))?
                {
                    ParsedLine::Complete(record) => record,
                    ParsedLine::Incomplete => {
                        torn_retries = bump_torn_retries(torn_retries, settings.max_torn_retries);
                        info!(
                            shard = spec.shard_id,
                            header = %spec.header_name,
                            retries_left = torn_retries,
                            "header not ready"
                        );
                        break;
                    }
                };

                let payload_end = record.payload_end()?;
                let payload_size = fs::metadata(&payload_path)
                    .await
                    .with_context(|| format!("failed to stat {}", payload_path.display()))?
                    .len();
                if payload_size < payload_end {
                    // Not a torn record: the header is complete, the
                    // payload bytes just have not caught up yet.
                    debug!(
                        shard = spec.shard_id,
                        payload_size,
                        payload_end,
                        "payload lagging; waiting"
                    );
                    break;
                }

                payload
                    .seek(SeekFrom::Start(record.payload_offset))
                    .await
                    .with_context(|| format!("failed to seek {}", payload_path.display()))?;
                let mut input = vec![0u8; record.input_size as usize];
                let mut output = vec![0u8; record.output_size as usize];
                payload
                    .read_exact(&mut input)
                    .await
                    .with_context(|| format!("read error on {}", payload_path.display()))?;
                payload
                    .read_exact(&mut output)
                    .await
                    .with_context(|| format!("read error on {}", payload_path.display()))?;

                pos += consumed as u64;

                sink.consume(&record, input, output, &mut cursor).await?;
                cursor.payload_offset = payload_end;
                cursor.header_offset = pos;
                store.save(&cursor).await?;

                entries += 1;
                torn_retries = 0;
            }
        }

        tokio::select! {
            _ = sleep(settings.poll_interval) => {}
            _ = cancel.cancelled() => {
                info!(shard = spec.shard_id, entries, "tailer interrupted; cursor persisted");
                return Ok(TailStatus::Interrupted { entries });
            }
        }

        if differs_from_today(spec.date) {
            if torn_retries == 0 {
                // The writers have abandoned this day's files and the tail
                // is clean.
                info!(shard = spec.shard_id, entries, "day rollover; tail is clean");
                sink.flush("day rollover", &mut cursor).await?;
                println!("Processed {entries} entries");
                return Ok(TailStatus::EndedSuccessfully { entries });
            }
            if torn_retries == 1 {
                warn!(
                    shard = spec.shard_id,
                    path = %header_path.display(),
                    header_offset = cursor.header_offset,
                    "giving up on torn trailing record after rollover"
                );
                sink.flush("gave up on torn trailing record", &mut cursor).await?;
                println!(
                    "Giving up on torn trailing record in {} at header offset {}",
                    header_path.display(),
                    cursor.header_offset
                );
                return Ok(TailStatus::EndedUnsuccessfully {
                    entries,
                    header_offset: cursor.header_offset,
                });
            }
        }
    }
}

/// First torn observation arms the counter; every later poll that still
/// sees a torn line decrements it, holding at 1 so the give-up check can
/// fire once the day rolls over.
fn bump_torn_retries(current: u32, max_torn_retries: u32) -> u32 {
    if current == 0 {
        max_torn_retries
    } else {
        (current - 1).max(1)
    }
}
