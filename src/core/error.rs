//! Error types for rangefetch
//!
//! Separates errors that only lose one byte range from errors that doom the
//! whole download.

use thiserror::Error;

/// Main error type for rangefetch operations
#[derive(Debug, Error)]
pub enum Error {
    /// The resource could not be probed (unreachable, bad status, no length)
    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    /// HTTP-specific error for a single request
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network connectivity issues
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The server does not honor `Range` requests
    #[error("Range requests not supported: {0}")]
    RangeNotSupported(String),

    /// A positional write into the destination file failed
    #[error("Write failed at offset {offset}: {source}")]
    WriteFailed {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    /// File I/O error outside the write path (create, sync, remove)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid configuration or parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Some ranges could not be fetched; the file is not complete
    #[error("Download incomplete: {failed} of {total} ranges failed (first error: {first_error})")]
    IncompleteDownload {
        failed: usize,
        total: usize,
        first_error: String,
    },

    /// The worker stopped because a sibling failed fatally
    #[error("Cancelled")]
    Cancelled,

    /// A worker task panicked or was aborted by the runtime
    #[error("Worker task failed: {0}")]
    TaskFailed(String),
}

impl Error {
    /// Whether this error makes a complete file impossible, so that sibling
    /// workers should be cancelled.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::WriteFailed { .. }
                | Error::IoError(_)
                | Error::RangeNotSupported(_)
                | Error::TaskFailed(_)
                | Error::ProbeFailed(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Error::NetworkError(err.to_string())
        } else {
            Error::HttpError(err.to_string())
        }
    }
}

/// Convenience result type for rangefetch operations
pub type Result<T> = std::result::Result<T, Error>;
