//! # Rangefetch Library
//!
//! Downloads a single HTTP(S) resource by splitting it into byte ranges,
//! fetching every range concurrently and writing each one straight into its
//! position in a pre-sized destination file.
//!
//! ## Features
//!
//! - **Range-partitioned fetch**: one concurrent request per byte range
//! - **Lock-free file writes**: disjoint ranges, positional writes
//! - **Honest results**: a download missing any range is reported as failed
//! - **Controlled aborts**: a failing write cancels the remaining workers
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Download with a filename taken from the server response
//!     rangefetch::get("https://example.com/debian-12.iso", None).await?;
//!
//!     // Download to a specific file
//!     rangefetch::get("https://example.com/debian-12.iso", Some("./debian.iso")).await?;
//!
//!     Ok(())
//! }
//! ```

use std::path::Path;

// Re-export core types that users might need
pub use crate::core::error::{Error, Result};
pub use crate::core::probe::{probe, ResourceInfo};
pub use crate::core::range::{default_connections, partition, ByteRange};
pub use crate::core::stream::{FetchOptions, OverwriteBehavior, DEFAULT_CHUNK_SIZE};
pub use crate::core::worker::WorkerOutcome;
pub use crate::core::{FetchJob, FetchReport, Fetcher};

// Internal modules
mod core;

/// Download a resource to a destination
///
/// # Arguments
/// * `url` - `http` or `https` URL of the resource
/// * `dest` - Optional destination file path. If None, the name comes from
///   `Content-Disposition` or the last URL path segment
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let report = rangefetch::get("https://example.com/report", None).await?;
/// println!("saved {} bytes to {}", report.content_length, report.destination.display());
/// # Ok(())
/// # }
/// ```
pub async fn get(url: &str, dest: Option<&str>) -> Result<FetchReport> {
    get_with_options(url, dest, FetchOptions::default()).await
}

/// Download with custom options
///
/// Provides control over the number of ranges, the write chunk size, the
/// overwrite behavior and the directory for derived filenames.
///
/// # Examples
/// ```rust,no_run
/// use rangefetch::{FetchOptions, OverwriteBehavior};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let options = FetchOptions {
///     connections: 8,
///     chunk_size: 256 * 1024,
///     overwrite: OverwriteBehavior::NeverOverwrite,
///     output_dir: Some("downloads".into()),
/// };
///
/// rangefetch::get_with_options("https://example.com/big.tar.zst", None, options).await?;
/// # Ok(())
/// # }
/// ```
pub async fn get_with_options(
    url: &str,
    dest: Option<&str>,
    options: FetchOptions,
) -> Result<FetchReport> {
    let job = FetchJob::new(url, dest.map(Path::new))?;
    Fetcher::new().fetch(&job, &options).await
}
