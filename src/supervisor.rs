//! Day-directory supervision: discover shard pairs, run one tailer per
//! pair, dispatch their outcomes, and follow the directory pointer across
//! day rollovers.

use crate::config::Config;
use crate::daypath::{date_path, differs_from_today, format_date, today};
use crate::sink::{ObjectStore, SinkTrigger};
use crate::tailer::{tail_pair, TailStatus, TailerSpec};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One matched `.header`/`.payload` pair in the day directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPair {
    pub stem: String,
    pub header_name: String,
    pub payload_name: String,
}

struct Worker {
    stem: String,
    shard_id: u64,
    handle: JoinHandle<Result<TailStatus>>,
}

/// Scan a day directory and pair `.header`/`.payload` files by stem.
///
/// `.state` files are never data. Orphans (one side only) are logged and
/// skipped; the writer may simply not have created the other side yet.
/// A missing directory is not an error: the producer creates it lazily,
/// so the caller just scans again later.
pub fn discover_pairs(day_dir: &Path) -> Result<Vec<ShardPair>> {
    if !day_dir.is_dir() {
        warn!(dir = %day_dir.display(), "day directory does not exist or is not accessible");
        return Ok(Vec::new());
    }

    let mut header_files: BTreeMap<String, String> = BTreeMap::new();
    let mut payload_files: BTreeMap<String, String> = BTreeMap::new();

    for entry in std::fs::read_dir(day_dir)
        .with_context(|| format!("failed to read directory {}", day_dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
            continue;
        };
        if extension == "state" {
            // Ignore state files!
            continue;
        }

        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };

        match extension {
            "header" => {
                header_files.insert(stem.to_string(), name.to_string());
            }
            "payload" => {
                payload_files.insert(stem.to_string(), name.to_string());
            }
            _ => {}
        }
    }

    let mut pairs = Vec::new();
    for (stem, header_name) in &header_files {
        match payload_files.remove(stem) {
            Some(payload_name) => pairs.push(ShardPair {
                stem: stem.clone(),
                header_name: header_name.clone(),
                payload_name,
            }),
            None => {
                warn!(stem = %stem, "header file has no matching payload file; skipping");
            }
        }
    }
    for stem in payload_files.keys() {
        warn!(stem = %stem, "payload file has no matching header file; skipping");
    }

    Ok(pairs)
}

/// Run the supervisor loop over `base_dir`.
///
/// With `fixed_date` set, processes that day's directory once and returns
/// when every spawned tailer has finished (reprocessing mode). Otherwise
/// binds to today, lets tailers terminate themselves at rollover, then
/// re-points at the new day's directory and rescans.
pub async fn run(
    base_dir: PathBuf,
    fixed_date: Option<NaiveDate>,
    config: &Config,
    store: Arc<dyn ObjectStore>,
    cancel: CancellationToken,
) -> Result<()> {
    let settings = config.tailer_settings();
    let scan_interval = config.scan_interval();

    let mut date = fixed_date.unwrap_or_else(today);
    let mut day_dir = base_dir.join(date_path(date));
    let mut tracked: HashSet<String> = HashSet::new();
    let mut workers: Vec<Worker> = Vec::new();
    let mut next_shard: u64 = 0;

    info!(
        dir = %day_dir.display(),
        date = %format_date(date),
        "monitoring day directory"
    );

    loop {
        match discover_pairs(&day_dir) {
            Ok(pairs) => {
                if pairs.is_empty() && tracked.is_empty() {
                    debug!(dir = %day_dir.display(), "no matching header/payload pairs found");
                }
                for pair in pairs {
                    if !tracked.insert(pair.stem.clone()) {
                        continue;
                    }
                    next_shard += 1;
                    let shard_id = next_shard;

                    info!(
                        shard = shard_id,
                        header = %pair.header_name,
                        payload = %pair.payload_name,
                        "spawning tailer for pair"
                    );

                    let spec = TailerSpec {
                        shard_id,
                        base_dir: base_dir.clone(),
                        date,
                        header_name: pair.header_name.clone(),
                        payload_name: pair.payload_name.clone(),
                    };
                    let sink = SinkTrigger::new(
                        shard_id,
                        config.sink.batch_bytes,
                        config.sink.batch_count,
                        store.clone(),
                    );
                    let handle = tokio::spawn(tail_pair(spec, settings, sink, cancel.child_token()));
                    workers.push(Worker {
                        stem: pair.stem,
                        shard_id,
                        handle,
                    });
                }
            }
            Err(err) => {
                warn!(error = %err, dir = %day_dir.display(), "directory scan failed");
            }
        }

        let (finished, running): (Vec<_>, Vec<_>) =
            workers.into_iter().partition(|worker| worker.handle.is_finished());
        workers = running;
        for worker in finished {
            reap_worker(worker, &mut tracked).await;
        }

        tokio::select! {
            _ = sleep(scan_interval) => {}
            _ = cancel.cancelled() => {
                info!("shutdown requested; waiting for tailers");
                for worker in workers {
                    reap_worker(worker, &mut tracked).await;
                }
                return Ok(());
            }
        }

        if fixed_date.is_some() {
            if workers.is_empty() {
                info!(dir = %day_dir.display(), "finished processing fixed date");
                return Ok(());
            }
            continue;
        }

        if differs_from_today(date) {
            if workers.is_empty() {
                date = today();
                day_dir = base_dir.join(date_path(date));
                tracked.clear();
                info!(
                    dir = %day_dir.display(),
                    date = %format_date(date),
                    "day rollover; switching to new directory"
                );
            } else {
                // Running tailers notice the rollover themselves and
                // terminate; the directory switch waits for them.
                debug!(active = workers.len(), "day rollover pending; tailers still draining");
            }
        }
    }
}

async fn reap_worker(worker: Worker, tracked: &mut HashSet<String>) {
    let Worker { stem, shard_id, handle } = worker;
    match handle.await {
        Ok(Ok(TailStatus::EndedSuccessfully { entries })) => {
            info!(shard = shard_id, stem = %stem, entries, "tailer finished gracefully");
        }
        Ok(Ok(TailStatus::EndedUnsuccessfully { entries, header_offset })) => {
            error!(
                shard = shard_id,
                stem = %stem,
                entries,
                header_offset,
                "tailer gave up on a torn trailing record; state file kept for review"
            );
        }
        Ok(Ok(TailStatus::HeaderOpenFailed)) => {
            info!(shard = shard_id, stem = %stem, "could not open header file; retrying later");
            tracked.remove(&stem);
        }
        Ok(Ok(TailStatus::PayloadOpenFailed)) => {
            info!(shard = shard_id, stem = %stem, "could not open payload file; retrying later");
            tracked.remove(&stem);
        }
        Ok(Ok(TailStatus::Interrupted { entries })) => {
            info!(shard = shard_id, stem = %stem, entries, "tailer interrupted");
        }
        Ok(Err(err)) => {
            error!(shard = shard_id, stem = %stem, error = %err, "tailer terminated with error");
            tracked.remove(&stem);
        }
        Err(err) => {
            error!(shard = shard_id, stem = %stem, error = %err, "tailer task panicked");
            tracked.remove(&stem);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").expect("write");
    }

    #[test]
    fn pairs_match_by_stem() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "file0.header");
        touch(dir.path(), "file0.payload");
        touch(dir.path(), "file1.header");
        touch(dir.path(), "file1.payload");

        let pairs = discover_pairs(dir.path()).expect("should scan");
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].stem, "file0");
        assert_eq!(pairs[0].header_name, "file0.header");
        assert_eq!(pairs[0].payload_name, "file0.payload");
        assert_eq!(pairs[1].stem, "file1");
    }

    #[test]
    fn orphans_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "lonely.header");
        touch(dir.path(), "widow.payload");
        touch(dir.path(), "whole.header");
        touch(dir.path(), "whole.payload");

        let pairs = discover_pairs(dir.path()).expect("should scan");
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].stem, "whole");
    }

    #[test]
    fn state_and_unrelated_files_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "file0.header");
        touch(dir.path(), "file0.payload");
        touch(dir.path(), "processor-1.state");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "noextension");

        let pairs = discover_pairs(dir.path()).expect("should scan");
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].stem, "file0");
    }

    #[test]
    fn missing_directory_yields_no_pairs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("2024").join("9").join("5");
        let pairs = discover_pairs(&missing).expect("should scan");
        assert!(pairs.is_empty());
    }
}
