//! End-to-end tailer scenarios over real files in a temp directory.
//!
//! Rollover-driven cases bind the tailer to yesterday's date so the
//! day-change check fires deterministically; in-day cases bind to today
//! and stop the tailer through its cancellation token.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use pairtail::cursor::state_file_name;
use pairtail::daypath::{date_path, today};
use pairtail::sink::{BatchEntry, ObjectStore, SinkTrigger};
use pairtail::tailer::{tail_pair, TailStatus, TailerSettings, TailerSpec};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const INPUT_SIZE: usize = 55;
const OUTPUT_SIZE: usize = 85;
const ENTRY_SIZE: usize = INPUT_SIZE + OUTPUT_SIZE;

fn header_line(payload_offset: u64) -> String {
    format!("Apple,Banana,Potato,,Carrot,Cherry,Date,{INPUT_SIZE},{OUTPUT_SIZE},{payload_offset}\n")
}

fn payload_entry() -> Vec<u8> {
    let mut bytes = "Input".repeat(11).into_bytes();
    bytes.resize(ENTRY_SIZE, b'O');
    bytes
}

fn fast_settings() -> TailerSettings {
    TailerSettings {
        poll_interval: Duration::from_millis(20),
        max_torn_retries: 3,
    }
}

fn yesterday() -> NaiveDate {
    today().pred_opt().expect("yesterday exists")
}

#[derive(Default)]
struct RecordingStore {
    batches: Mutex<Vec<(String, Vec<BatchEntry>)>>,
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn put_batch(&self, _shard_id: u64, reason: &str, entries: &[BatchEntry]) -> Result<()> {
        self.batches
            .lock()
            .expect("lock")
            .push((reason.to_string(), entries.to_vec()));
        Ok(())
    }
}

struct Fixture {
    _base: tempfile::TempDir,
    base_dir: PathBuf,
    day_dir: PathBuf,
    date: NaiveDate,
    store: Arc<RecordingStore>,
}

impl Fixture {
    fn new(date: NaiveDate) -> Self {
        let base = tempfile::tempdir().expect("tempdir");
        let base_dir = base.path().to_path_buf();
        let day_dir = base_dir.join(date_path(date));
        std::fs::create_dir_all(&day_dir).expect("create day dir");
        Fixture {
            _base: base,
            base_dir,
            day_dir,
            date,
            store: Arc::new(RecordingStore::default()),
        }
    }

    fn spec(&self, shard_id: u64) -> TailerSpec {
        TailerSpec {
            shard_id,
            base_dir: self.base_dir.clone(),
            date: self.date,
            header_name: "file0.header".to_string(),
            payload_name: "file0.payload".to_string(),
        }
    }

    fn sink(&self, shard_id: u64) -> SinkTrigger {
        self.sink_with_limits(shard_id, 5_000, 5_000)
    }

    fn sink_with_limits(&self, shard_id: u64, batch_bytes: u64, batch_count: u64) -> SinkTrigger {
        SinkTrigger::new(shard_id, batch_bytes, batch_count, self.store.clone())
    }

    fn write(&self, name: &str, bytes: &[u8]) {
        std::fs::write(self.day_dir.join(name), bytes).expect("write file");
    }

    fn append(&self, name: &str, bytes: &[u8]) {
        let mut file = OpenOptions::new()
            .append(true)
            .open(self.day_dir.join(name))
            .expect("open for append");
        file.write_all(bytes).expect("append");
    }

    fn state(&self, shard_id: u64) -> Option<String> {
        std::fs::read_to_string(self.day_dir.join(state_file_name(shard_id))).ok()
    }

    fn batches(&self) -> Vec<(String, Vec<BatchEntry>)> {
        self.store.batches.lock().expect("lock").clone()
    }
}

#[tokio::test]
async fn single_complete_record_is_consumed_and_day_ends_cleanly() {
    let fx = Fixture::new(yesterday());
    fx.write("file0.header", header_line(0).as_bytes());
    fx.write("file0.payload", &payload_entry());

    let status = tail_pair(fx.spec(1), fast_settings(), fx.sink(1), CancellationToken::new())
        .await
        .expect("tailer should finish");

    assert_eq!(status, TailStatus::EndedSuccessfully { entries: 1 });

    let expected_header_offset = header_line(0).len() as u64;
    assert_eq!(
        fx.state(1).expect("state file"),
        format!("{expected_header_offset},140,140,1\n")
    );

    let batches = fx.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].0, "day rollover");
    assert_eq!(batches[0].1.len(), 1);
    let entry = &batches[0].1[0];
    assert_eq!(entry.input.len(), INPUT_SIZE);
    assert_eq!(entry.output.len(), OUTPUT_SIZE);
    assert!(entry.input.starts_with(b"Input"));
    assert_eq!(entry.meta, vec!["Apple", "Banana", "Potato", "", "Carrot", "Cherry", "Date"]);
}

#[tokio::test]
async fn rerun_over_finished_day_consumes_nothing() {
    let fx = Fixture::new(yesterday());
    fx.write("file0.header", header_line(0).as_bytes());
    fx.write("file0.payload", &payload_entry());

    let status = tail_pair(fx.spec(1), fast_settings(), fx.sink(1), CancellationToken::new())
        .await
        .expect("first run");
    assert_eq!(status, TailStatus::EndedSuccessfully { entries: 1 });
    let state_after_first = fx.state(1).expect("state file");

    let status = tail_pair(fx.spec(1), fast_settings(), fx.sink(1), CancellationToken::new())
        .await
        .expect("second run");
    assert_eq!(status, TailStatus::EndedSuccessfully { entries: 0 });
    assert_eq!(fx.state(1).expect("state file"), state_after_first);

    // The second run had nothing pending, so the store must only hold the
    // first run's batch; stale on-disk accumulators alone trigger nothing.
    let batches = fx.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].0, "day rollover");
}

#[tokio::test]
async fn torn_trailing_header_is_never_advanced_past() {
    let fx = Fixture::new(today());
    fx.write("file0.header", b"Apple,Banana,Potato,,Carrot,Che");
    fx.write("file0.payload", b"");

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(tail_pair(
        fx.spec(1),
        fast_settings(),
        fx.sink(1),
        cancel.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(fx.state(1).is_none(), "torn record must not advance the cursor");

    // The writer finishes the record and its payload.
    fx.append("file0.header", b"rry,Date,55,85,0\n");
    fx.append("file0.payload", &payload_entry());
    tokio::time::sleep(Duration::from_millis(300)).await;

    let expected_header_offset = header_line(0).len() as u64;
    assert_eq!(
        fx.state(1).expect("state file"),
        format!("{expected_header_offset},140,140,1\n")
    );

    cancel.cancel();
    let status = handle.await.expect("join").expect("tailer result");
    assert_eq!(status, TailStatus::Interrupted { entries: 1 });
}

#[tokio::test]
async fn payload_lag_waits_for_the_fence_then_consumes() {
    let fx = Fixture::new(today());
    fx.write("file0.header", header_line(0).as_bytes());
    fx.write("file0.payload", &payload_entry()[..100]);

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(tail_pair(
        fx.spec(1),
        fast_settings(),
        fx.sink(1),
        cancel.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(fx.state(1).is_none(), "short payload must not be partially read");

    fx.append("file0.payload", &payload_entry()[100..]);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let expected_header_offset = header_line(0).len() as u64;
    assert_eq!(
        fx.state(1).expect("state file"),
        format!("{expected_header_offset},140,140,1\n")
    );

    cancel.cancel();
    let status = handle.await.expect("join").expect("tailer result");
    assert_eq!(status, TailStatus::Interrupted { entries: 1 });
}

#[tokio::test]
async fn payload_lag_at_rollover_exits_clean_without_consuming() {
    let fx = Fixture::new(yesterday());
    fx.write("file0.header", header_line(0).as_bytes());
    // The payload never catches up with the advertised 140 bytes.
    fx.write("file0.payload", &payload_entry()[..100]);

    let status = tail_pair(fx.spec(1), fast_settings(), fx.sink(1), CancellationToken::new())
        .await
        .expect("tailer should finish");

    // Payload lag is not a torn record, so rollover ends the day cleanly;
    // the cursor still points at the unconsumed record for a later rerun.
    assert_eq!(status, TailStatus::EndedSuccessfully { entries: 0 });
    assert!(fx.state(1).is_none());
    assert!(fx.batches().is_empty());
}

#[tokio::test]
async fn torn_record_at_rollover_gives_up_after_retries() {
    let fx = Fixture::new(yesterday());
    let mut header = header_line(0).into_bytes();
    header.extend_from_slice(b"Apple,Banana");
    fx.write("file0.header", &header);
    fx.write("file0.payload", &payload_entry());

    let status = tail_pair(fx.spec(1), fast_settings(), fx.sink(1), CancellationToken::new())
        .await
        .expect("tailer should finish");

    let expected_header_offset = header_line(0).len() as u64;
    assert_eq!(
        status,
        TailStatus::EndedUnsuccessfully {
            entries: 1,
            header_offset: expected_header_offset,
        }
    );
    assert_eq!(
        fx.state(1).expect("state file"),
        format!("{expected_header_offset},140,140,1\n")
    );

    let batches = fx.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].0, "gave up on torn trailing record");
    assert_eq!(batches[0].1.len(), 1);
}

#[tokio::test]
async fn restart_resumes_exactly_at_the_saved_cursor() {
    let fx = Fixture::new(yesterday());
    let first = header_line(0);
    let second = header_line(ENTRY_SIZE as u64);
    let mut header = first.clone().into_bytes();
    header.extend_from_slice(second.as_bytes());
    fx.write("file0.header", &header);

    let mut payload = payload_entry();
    payload.extend_from_slice(&payload_entry());
    fx.write("file0.payload", &payload);

    // Cursor as persisted after the first entry of an earlier run.
    fx.write(
        &state_file_name(1),
        format!("{},140,140,1\n", first.len()).as_bytes(),
    );

    let status = tail_pair(fx.spec(1), fast_settings(), fx.sink(1), CancellationToken::new())
        .await
        .expect("tailer should finish");
    assert_eq!(status, TailStatus::EndedSuccessfully { entries: 1 });

    let total_header = (first.len() + second.len()) as u64;
    assert_eq!(
        fx.state(1).expect("state file"),
        format!("{total_header},280,280,2\n")
    );
}

#[tokio::test]
async fn threshold_flush_lands_zeroed_accumulators_on_disk() {
    let fx = Fixture::new(yesterday());
    let mut header = Vec::new();
    let mut payload = Vec::new();
    for index in 0..3u64 {
        header.extend_from_slice(header_line(index * ENTRY_SIZE as u64).as_bytes());
        payload.extend_from_slice(&payload_entry());
    }
    fx.write("file0.header", &header);
    fx.write("file0.payload", &payload);

    // Count threshold 2 trips on the third entry.
    let status = tail_pair(
        fx.spec(1),
        fast_settings(),
        fx.sink_with_limits(1, 1_000_000, 2),
        CancellationToken::new(),
    )
    .await
    .expect("tailer should finish");
    assert_eq!(status, TailStatus::EndedSuccessfully { entries: 3 });

    let state = fx.state(1).expect("state file");
    let fields: Vec<&str> = state.trim_end().split(',').collect();
    assert_eq!(fields[2], "0", "accumulated size must reset after flush");
    assert_eq!(fields[3], "0", "accumulated count must reset after flush");

    let batches = fx.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].1.len(), 3);
    assert!(batches[0].0.starts_with("reached limit"));
}

#[tokio::test]
async fn empty_header_file_idles_until_clean_rollover() {
    let fx = Fixture::new(yesterday());
    fx.write("file0.header", b"");
    fx.write("file0.payload", b"");

    let status = tail_pair(fx.spec(1), fast_settings(), fx.sink(1), CancellationToken::new())
        .await
        .expect("tailer should finish");
    assert_eq!(status, TailStatus::EndedSuccessfully { entries: 0 });
    assert!(fx.state(1).is_none());
    assert!(fx.batches().is_empty());
}

#[tokio::test]
async fn eleven_field_line_is_treated_as_torn() {
    let fx = Fixture::new(yesterday());
    fx.write(
        "file0.header",
        b"Apple,Banana,Potato,,Carrot,Cherry,Date,55,85,0,extra\n",
    );
    fx.write("file0.payload", &payload_entry());

    let status = tail_pair(fx.spec(1), fast_settings(), fx.sink(1), CancellationToken::new())
        .await
        .expect("tailer should finish");
    assert_eq!(
        status,
        TailStatus::EndedUnsuccessfully {
            entries: 0,
            header_offset: 0,
        }
    );
}

#[tokio::test]
async fn missing_files_surface_open_failures_without_state() {
    let fx = Fixture::new(yesterday());

    let status = tail_pair(fx.spec(1), fast_settings(), fx.sink(1), CancellationToken::new())
        .await
        .expect("tailer should finish");
    assert_eq!(status, TailStatus::HeaderOpenFailed);
    assert!(fx.state(1).is_none());

    fx.write("file0.header", b"");
    let status = tail_pair(fx.spec(1), fast_settings(), fx.sink(1), CancellationToken::new())
        .await
        .expect("tailer should finish");
    assert_eq!(status, TailStatus::PayloadOpenFailed);
    assert!(fx.state(1).is_none());
}

#[tokio::test]
async fn corrupt_numeric_field_in_ten_field_record_is_fatal() {
    let fx = Fixture::new(yesterday());
    fx.write(
        "file0.header",
        b"Apple,Banana,Potato,,Carrot,Cherry,Date,fiftyfive,85,0\n",
    );
    fx.write("file0.payload", &payload_entry());

    let err = tail_pair(fx.spec(1), fast_settings(), fx.sink(1), CancellationToken::new())
        .await
        .expect_err("corrupt sizes must be fatal");
    assert!(format!("{err:#}").contains("corrupt"));
}
