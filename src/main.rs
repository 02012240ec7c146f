//! logship - durable, time-indexed JSON log shipping
//!
//! # Usage
//!
//! ```bash
//! # Store JSON lines from stdin, serving the live channel on :8080
//! producer | logship store --lockfile /var/lib/logship/lock --pubsub-port 8080
//!
//! # Query interactively: empty line or ALL, one timestamp, or two
//! logship fetch --dir /var/lib/logship/destination
//! ```

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use log::{error, info};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{LinesStream, SplitStream};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use logship::config::{Discovery, FetcherConfig, PubSubConfig, StorerConfig};
use logship::naming::DEFAULT_DATE_FORMAT;
use logship::server::{self, AppState};
use logship::{AdminReply, Broadcaster, Fetcher, PushOutcome, Query, Storer, StorerService};

type CliResult = Result<(), Box<dyn Error>>;

/// Durable, time-indexed JSON log shipping
#[derive(Parser, Debug)]
#[command(name = "logship")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level filter (trace, debug, info, warn, error). Falls back to
    /// RUST_LOG, then info.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read JSON lines from stdin into time-range-named files
    Store(StoreArgs),

    /// Answer time-range queries typed on stdin
    Fetch(FetchArgs),
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// Writer lock file; directories default next to it
    #[arg(long, default_value = "/tmp/logship/lock")]
    lockfile: PathBuf,

    #[arg(long)]
    intermediate_dir: Option<PathBuf>,

    #[arg(long)]
    destination_dir: Option<PathBuf>,

    /// Progress line every N entries per file (0 disables)
    #[arg(long, default_value_t = 1000)]
    log_frequency: u64,

    /// Drop entries whose ms is further than this from now
    #[arg(long, default_value_t = 5000)]
    max_time_discrepancy_ms: i64,

    #[arg(long)]
    max_entries_per_file: Option<u64>,

    #[arg(long)]
    max_file_age_ms: Option<u64>,

    /// strftime pattern for destination date prefixes (UTC)
    #[arg(long, default_value = DEFAULT_DATE_FORMAT)]
    date_format: String,

    /// Take "now" from entry timestamps, for re-sharding historical logs
    #[arg(long)]
    mock_time: bool,

    /// Accept STOP, CONFIG, CREATE, FLUSH, STATUS, STATS, UNITTEST_STATS
    #[arg(long)]
    debug: bool,

    /// Serve the pub/sub HTTP surface on this port
    #[arg(long)]
    pubsub_port: Option<u16>,

    #[arg(long, default_value = "/pubsub")]
    pubsub_mount: String,

    #[arg(long, default_value = "entries")]
    pubsub_channel: String,

    #[arg(long, default_value_t = 15_000)]
    keepalive_ms: u64,

    #[arg(long, default_value = "keepalive")]
    keepalive_text: String,
}

impl StoreArgs {
    fn storer_config(&self) -> StorerConfig {
        StorerConfig {
            lockfile: self.lockfile.clone(),
            intermediate_dir: self.intermediate_dir.clone(),
            destination_dir: self.destination_dir.clone(),
            log_frequency: (self.log_frequency > 0).then_some(self.log_frequency),
            max_time_discrepancy_ms: self.max_time_discrepancy_ms,
            max_entries_per_file: self.max_entries_per_file,
            max_file_age_ms: self.max_file_age_ms,
            date_format: self.date_format.clone(),
            mock_time: self.mock_time,
            debug: self.debug,
            ..StorerConfig::default()
        }
    }

    fn pubsub_config(&self) -> PubSubConfig {
        PubSubConfig {
            port: self.pubsub_port.unwrap_or_default(),
            mount: self.pubsub_mount.clone(),
            channel: self.pubsub_channel.clone(),
            keepalive_ms: self.keepalive_ms,
            keepalive_text: self.keepalive_text.clone(),
            ..PubSubConfig::default()
        }
    }
}

#[derive(Args, Debug)]
struct FetchArgs {
    /// Destination directory to query
    #[arg(long)]
    dir: PathBuf,

    #[arg(long, default_value_t = 250)]
    max_open_files: usize,

    /// Rescan the directory every N ms instead of watching it
    #[arg(long)]
    poll_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> CliResult {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref())?;

    match cli.command {
        Command::Store(args) => run_store(args).await,
        Command::Fetch(args) => run_fetch(args).await,
    }
}

/// Log to stderr; stdout carries command output.
fn init_logging(level: Option<&str>) -> CliResult {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();

    Ok(())
}

async fn run_store(args: StoreArgs) -> CliResult {
    let config = args.storer_config();
    let pubsub = args.pubsub_config();

    let storer = Storer::open(config.clone())?;
    let broadcaster = Arc::new(Broadcaster::new(pubsub.channel_capacity));
    let service = StorerService::start(storer, broadcaster);

    let server = match args.pubsub_port {
        Some(port) => {
            let history = Fetcher::open(FetcherConfig::new(config.destination_dir()))?;
            history.start_discovery()?;
            let listener = TcpListener::bind(("0.0.0.0", port)).await?;
            let grace = pubsub.shutdown_grace();
            let state = Arc::new(AppState {
                storer: service.clone(),
                config: pubsub,
                history: Some(Arc::new(history)),
            });
            Some(tokio::spawn(server::serve(
                listener,
                state,
                service.stopped(),
                grace,
            )))
        }
        None => None,
    };

    let ingested = ingest(&service, BufReader::new(tokio::io::stdin())).await;
    if let Err(e) = &ingested {
        error!("Reading input failed: {e}");
    }

    info!("Tearing down");
    let rotated = service.shutdown();
    if let Some(server) = server {
        server.await??;
    }
    ingested?;
    rotated?;
    info!("Done");
    Ok(())
}

/// Feed newline-separated input into the storer until EOF or `STOP`.
///
/// Lines are decoded lossily, so bytes that are not UTF-8 end up as an
/// invalid JSON rejection instead of ending the input.
async fn ingest<R>(service: &StorerService, input: R) -> CliResult
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = SplitStream::new(input.split(b'\n'));
    while let Some(line) = lines.next().await {
        let line = line?;
        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        match service.submit(line.to_owned()).await? {
            PushOutcome::Admin(AdminReply::Stop) => break,
            PushOutcome::Admin(reply) => print_json(&reply_json(&reply)?)?,
            PushOutcome::Accepted { .. } | PushOutcome::Rejected(_) => {}
        }
    }
    Ok(())
}

fn reply_json(reply: &AdminReply) -> serde_json::Result<Value> {
    Ok(match reply {
        AdminReply::Stop => json!({ "stop": true }),
        AdminReply::Config(config) => serde_json::to_value(config)?,
        AdminReply::Created { generation } => json!({ "created": generation }),
        AdminReply::Flushed(rotated) => json!({ "flushed": rotated }),
        AdminReply::Status(status) => status.clone(),
        AdminReply::Stats(stats) => serde_json::to_value(stats)?,
    })
}

fn print_json(value: &Value) -> CliResult {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

const SYNOPSIS: &str = "Type in empty string or \"ALL\" without quotes to fetch all records, \
     one timestamp in ms to fetch all records after that timestamp \
     or two timestamps to fetch all records between those timestamps.";

/// Interpret one line of the interactive fetch loop.
///
/// Empty or `ALL` selects everything, one timestamp `[a, +inf)`, two
/// timestamps `[min, max)`. Anything else is `None`.
fn parse_range(line: &str) -> Option<Query> {
    let line = line.trim();
    if line.is_empty() || line == "ALL" {
        return Some(Query::all());
    }
    let numbers: Vec<i64> = line
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    match numbers[..] {
        [a] => Some(Query::since(a)),
        [a, b] => Some(Query::between(a.min(b), a.max(b))),
        _ => None,
    }
}

async fn run_fetch(args: FetchArgs) -> CliResult {
    let fetcher = Fetcher::open(FetcherConfig {
        dir: args.dir,
        max_open_files: args.max_open_files,
        discovery: match args.poll_ms {
            Some(interval_ms) => Discovery::Poll { interval_ms },
            None => Discovery::Watch,
        },
    })?;
    fetcher.start_discovery()?;

    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    while let Some(line) = lines.next().await {
        let Some(query) = parse_range(&line?) else {
            println!("{SYNOPSIS}");
            continue;
        };
        let entries = fetcher.fetch(query).await?;
        let mut out = std::io::stdout().lock();
        for entry in &entries {
            writeln!(out, "{}", entry.to_line()?)?;
        }
        info!("{} entries.", entries.len());
    }

    info!("Tearing down");
    fetcher.shutdown();
    Ok(())
}
