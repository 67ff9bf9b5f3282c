//! Core download functionality for rangefetch
//!
//! The [`Fetcher`] probes a resource, partitions it into byte ranges, runs one
//! worker per range against a shared pre-sized file and joins them all before
//! deciding whether the download succeeded.

use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::{Client, ClientBuilder};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::core::error::{Error, Result};
use crate::core::probe::{probe, ResourceInfo};
use crate::core::range::{partition, ByteRange};
use crate::core::source::FetchJob;
use crate::core::storage::SharedFile;
use crate::core::stream::{FetchOptions, OverwriteBehavior};
use crate::core::worker::{fetch_range, WorkerOutcome};

/// Longest wait for any single read before a range request is failed
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Global HTTP client with optimizations
static GLOBAL_CLIENT: Lazy<Client> = Lazy::new(|| {
    ClientBuilder::new()
        .tcp_keepalive(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(32)
        .connect_timeout(Duration::from_secs(10)) // Connection timeout
        .read_timeout(READ_TIMEOUT) // A stalled body fails its range
        .user_agent(format!("rangefetch/{}", env!("RANGEFETCH_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            log::warn!("falling back to the default HTTP client: {e}");
            Client::new()
        })
});

/// Summary of a finished download
#[derive(Debug, Clone, PartialEq)]
pub struct FetchReport {
    /// Where the bytes were written
    pub destination: PathBuf,
    /// Size of the resource (and of the file)
    pub content_length: u64,
    /// Number of byte ranges fetched in parallel
    pub ranges: usize,
}

/// Check if destination file exists and handle overwrite behavior
fn check_overwrite_permission(file_path: &Path, behavior: &OverwriteBehavior) -> Result<()> {
    if !file_path.exists() {
        return Ok(());
    }

    match behavior {
        OverwriteBehavior::Force => {
            log::info!("overwriting existing file {}", file_path.display());
            Ok(())
        }
        OverwriteBehavior::NeverOverwrite => Err(Error::IoError(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!(
                "File already exists: {} (remove --no-clobber to overwrite)",
                file_path.display()
            ),
        ))),
    }
}

/// Range-partitioned parallel downloader
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher {
    /// Create a fetcher sharing the process-wide HTTP client
    pub fn new() -> Self {
        Self {
            client: GLOBAL_CLIENT.clone(),
        }
    }

    /// Create a fetcher with a custom HTTP client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Probe the job's URL without downloading anything
    pub async fn probe(&self, job: &FetchJob) -> Result<ResourceInfo> {
        probe(&self.client, &job.url).await
    }

    /// Download the job's resource into its destination file.
    ///
    /// Succeeds only when every byte range was written. On failure after the
    /// file was created, the partial file is removed.
    pub async fn fetch(&self, job: &FetchJob, options: &FetchOptions) -> Result<FetchReport> {
        let info = self.probe(job).await?;
        let destination = job.resolve_destination(&info.suggested_filename, options.output_dir.as_deref());

        log::info!(
            "download file from {}, content length {}",
            job.url,
            info.content_length
        );

        check_overwrite_permission(&destination, &options.overwrite)?;

        let file = SharedFile::create(&destination, info.content_length).await?;
        log::info!("downloading file {}", destination.display());

        let ranges = partition(info.content_length, options.connections);

        let fetched = self.fetch_ranges(job, &ranges, &file, options.chunk_size).await;
        let bytes = settle(file, fetched).await?;
        debug_assert_eq!(bytes, info.content_length);

        log::info!(
            "finished {} ({} bytes in {} ranges)",
            destination.display(),
            info.content_length,
            ranges.len()
        );
        Ok(FetchReport {
            destination,
            content_length: info.content_length,
            ranges: ranges.len(),
        })
    }

    /// Fan out one worker per range and wait for all of them
    async fn fetch_ranges(
        &self,
        job: &FetchJob,
        ranges: &[ByteRange],
        file: &SharedFile,
        chunk_size: usize,
    ) -> Result<u64> {
        let cancel = CancellationToken::new();
        let mut workers = JoinSet::new();

        for &range in ranges {
            workers.spawn(fetch_range(
                self.client.clone(),
                job.url.clone(),
                range,
                file.clone(),
                chunk_size,
                cancel.clone(),
            ));
        }

        join_workers(workers, &cancel).await
    }
}

/// Keep the file only when every range landed and it synced cleanly;
/// otherwise remove it and return the error.
async fn settle(file: SharedFile, fetched: Result<u64>) -> Result<u64> {
    let result = match fetched {
        Ok(bytes) => file.clone().finish().await.map(|()| bytes),
        Err(e) => Err(e),
    };

    if result.is_err() {
        let path = file.path().to_path_buf();
        match file.discard().await {
            Ok(()) => log::warn!("removed incomplete file {}", path.display()),
            Err(cleanup) => {
                log::warn!("could not remove incomplete file {}: {cleanup}", path.display())
            }
        }
    }
    result
}

/// Join barrier over every spawned worker.
///
/// The first fatal outcome cancels the remaining workers and is the error
/// returned; later fatal outcomes are only logged. Request failures do not
/// cancel anything but turn the result into [`Error::IncompleteDownload`].
/// Returns the total number of bytes written on success.
pub(crate) async fn join_workers(
    mut workers: JoinSet<WorkerOutcome>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let total = workers.len();
    let mut written = 0u64;
    let mut fatal: Option<Error> = None;
    let mut failed: Vec<(ByteRange, Error)> = Vec::new();

    while let Some(joined) = workers.join_next().await {
        let outcome = match joined {
            Ok(outcome) => {
                log::debug!("range {} joined", outcome.range());
                outcome
            }
            Err(e) => {
                record_fatal(&mut fatal, cancel, Error::TaskFailed(e.to_string()));
                continue;
            }
        };

        match outcome {
            WorkerOutcome::Completed { bytes, .. } => written += bytes,
            WorkerOutcome::RequestFailed { range, error } => failed.push((range, error)),
            WorkerOutcome::Fatal { range, error } => {
                log::error!("range {range} aborted the download: {error}");
                record_fatal(&mut fatal, cancel, error);
            }
            WorkerOutcome::Cancelled { .. } => {}
        }
    }

    if let Some(error) = fatal {
        return Err(error);
    }

    if let Some((range, first)) = failed.first() {
        return Err(Error::IncompleteDownload {
            failed: failed.len(),
            total,
            first_error: format!("range {range}: {first}"),
        });
    }

    Ok(written)
}

fn record_fatal(slot: &mut Option<Error>, cancel: &CancellationToken, error: Error) {
    if slot.is_none() {
        cancel.cancel();
        *slot = Some(error);
    } else {
        log::debug!("additional fatal error after cancellation: {error}");
    }
}
