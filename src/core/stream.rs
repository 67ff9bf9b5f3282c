//! Streaming implementations for rangefetch
//!
//! Provides the AsyncRead adapter over HTTP response bodies and the options
//! that shape a fetch.

use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::TryStreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::core::range::default_connections;

/// Bytes collected from a range body before each positional write (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// A response body exposed as an async reader
pub enum BodyStream {
    /// HTTP stream using reqwest
    Http(Box<dyn AsyncRead + Send + Unpin>),
}

impl AsyncRead for BodyStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            BodyStream::Http(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

/// Creates a BodyStream from an HTTP response
pub fn create_http_stream(response: reqwest::Response) -> BodyStream {
    let stream = Box::new(tokio_util::io::StreamReader::new(
        response.bytes_stream().map_err(std::io::Error::other),
    ));
    BodyStream::Http(stream)
}

/// Read until `buffer` is full or the stream ends.
///
/// Returns the number of bytes placed at the front of `buffer`; 0 means the
/// stream was already exhausted.
pub async fn fill_chunk<R>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Behavior when the destination file already exists
#[derive(Debug, Clone, Default, PartialEq)]
pub enum OverwriteBehavior {
    /// Truncate the existing file and download over it (default)
    #[default]
    Force,
    /// Never overwrite, fail if file exists
    NeverOverwrite,
}

/// Options for fetch operations
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Number of byte ranges fetched concurrently
    pub connections: usize,

    /// Bytes buffered per positional write
    pub chunk_size: usize,

    /// Behavior when destination file already exists
    pub overwrite: OverwriteBehavior,

    /// Directory for filenames derived from the response; current dir if `None`
    pub output_dir: Option<PathBuf>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            connections: default_connections(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            overwrite: OverwriteBehavior::default(),
            output_dir: None,
        }
    }
}
