//! # Rangefetch CLI
//!
//! Command-line interface for the rangefetch library.
//! Downloads one HTTP(S) resource as concurrent byte ranges.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::{error, info};
use rangefetch::{
    default_connections, partition, FetchJob, FetchOptions, Fetcher, OverwriteBehavior,
    DEFAULT_CHUNK_SIZE,
};

/// Command-line interface for rangefetch
#[derive(Parser)]
#[command(name = "rangefetch")]
#[command(about = "Parallel HTTP(S) downloader that fetches byte ranges concurrently")]
#[command(long_about = "Downloads a single resource by splitting it into byte ranges:
  rangefetch https://example.com/debian-12.iso              # Name from the server
  rangefetch https://example.com/debian-12.iso -o d.iso     # Explicit destination
  rangefetch https://example.com/debian-12.iso -n 4         # Four parallel ranges

File Overwrite Behavior:
  An existing destination is truncated and overwritten by default
  --no-clobber                     # Never overwrite, fail if file exists")]
#[command(version = env!("RANGEFETCH_VERSION"))]
struct Cli {
    /// http[s] URL of the resource to download
    url: String,

    /// Output file path (default: name from Content-Disposition or the URL)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of byte ranges fetched in parallel (default: number of CPUs)
    #[arg(short = 'n', long)]
    connections: Option<usize>,

    /// Bytes buffered per positional write
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Never overwrite existing files (fail if destination exists)
    #[arg(long)]
    no_clobber: bool,

    /// Probe the resource and show the planned ranges without downloading
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging to stderr
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .init();

    if let Err(e) = run(&cli).await {
        error!("download from {} failed: {e:#}", cli.url);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    info!("start downloading...");

    let job = FetchJob::new(&cli.url, cli.output.as_deref())?;
    let options = FetchOptions {
        connections: cli.connections.unwrap_or_else(default_connections),
        chunk_size: cli.chunk_size,
        overwrite: if cli.no_clobber {
            OverwriteBehavior::NeverOverwrite
        } else {
            OverwriteBehavior::Force
        },
        output_dir: None,
    };

    if options.connections == 0 {
        anyhow::bail!("--connections must be at least 1");
    }
    if options.chunk_size == 0 {
        anyhow::bail!("--chunk-size must be at least 1");
    }

    let fetcher = Fetcher::new();

    if cli.dry_run {
        return dry_run(&fetcher, &job, &options).await;
    }

    let report = fetcher.fetch(&job, &options).await?;

    eprintln!(
        "Saved {} ({} bytes, {} ranges)",
        report.destination.display(),
        report.content_length,
        report.ranges
    );
    Ok(())
}

/// Show what would be downloaded without creating any file
async fn dry_run(fetcher: &Fetcher, job: &FetchJob, options: &FetchOptions) -> anyhow::Result<()> {
    let info = fetcher.probe(job).await.context("dry run probe")?;
    let destination = job.resolve_destination(&info.suggested_filename, options.output_dir.as_deref());

    eprintln!("[DRY RUN] Would download: {}", job.url);
    eprintln!("[DRY RUN] Content length: {} bytes", info.content_length);
    eprintln!("[DRY RUN] Destination: {}", destination.display());
    for range in partition(info.content_length, options.connections) {
        eprintln!("[DRY RUN]   range {range} ({} bytes)", range.len());
    }
    Ok(())
}
