//! pairtail process entry.
//!
//! Two modes share one binary, mirroring how supervisors re-invoke the
//! executable for each shard:
//!
//! - tailer mode: `pairtail -p <shardId> <baseDir> <YYYY-MM-DD> <header> <payload>`
//! - supervisor mode: `pairtail <baseDir> [<YYYY-MM-DD>]`
//!
//! In tailer mode the process exit code carries the tail outcome
//! (0 clean rollover, 10 torn give-up, 101/102 open failures).

use anyhow::{bail, Context, Result};
use clap::Parser;
use pairtail::config::Config;
use pairtail::daypath::parse_date;
use pairtail::sink::{FileStore, LoggingStore, ObjectStore, SinkTrigger};
use pairtail::supervisor;
use pairtail::tailer::{tail_pair, TailerSpec};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "pairtail",
    about = "Tailing processor for paired header/payload shard logs",
    version
)]
struct Cli {
    /// Run a single pair tailer for this shard id instead of the supervisor
    #[arg(short = 'p', value_name = "SHARD_ID")]
    shard: Option<u64>,

    /// Optional TOML configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Base directory holding the date-partitioned log tree
    base_dir: PathBuf,

    /// Working date (YYYY-MM-DD); the supervisor defaults to today and rolls
    date: Option<String>,

    /// Header file name (tailer mode only)
    header: Option<String>,

    /// Payload file name (tailer mode only)
    payload: Option<String>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "failed to process logs");
            eprintln!("Failed to process logs: {err:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    let store: Arc<dyn ObjectStore> = match config.output_dir_path() {
        Some(dir) => {
            info!(output_dir = %dir.display(), "configured file-backed object store");
            Arc::new(FileStore::new(dir))
        }
        None => Arc::new(LoggingStore),
    };

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    match cli.shard {
        Some(shard_id) => {
            let (Some(date), Some(header), Some(payload)) =
                (cli.date.as_deref(), cli.header, cli.payload)
            else {
                bail!("tailer mode requires <baseDir> <YYYY-MM-DD> <headerFilename> <payloadFilename>");
            };
            let date = parse_date(date)?;

            let spec = TailerSpec {
                shard_id,
                base_dir: cli.base_dir,
                date,
                header_name: header,
                payload_name: payload,
            };
            let sink = SinkTrigger::new(
                shard_id,
                config.sink.batch_bytes,
                config.sink.batch_count,
                store,
            );
            let status = tail_pair(spec, config.tailer_settings(), sink, cancel).await?;
            Ok(status.exit_code())
        }
        None => {
            if cli.header.is_some() || cli.payload.is_some() {
                bail!("supervisor mode takes only <baseDir> [<YYYY-MM-DD>]");
            }
            let fixed_date = cli.date.as_deref().map(parse_date).transpose()?;
            supervisor::run(cli.base_dir, fixed_date, &config, store, cancel).await?;
            Ok(0)
        }
    }
}

fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(err) => {
                    error!(error = %err, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        error!(error = %err, "failed while waiting for shutdown signal");
                    }
                }
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed while waiting for shutdown signal");
            }
        }
        info!("shutdown signal received");
        cancel.cancel();
    });
}
