//! Resource probe
//!
//! One unconditional GET whose status and headers tell us how large the
//! resource is and what to call it. The body is dropped unread; range workers
//! fetch the content themselves.

use reqwest::header::{ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH};
use reqwest::{Client, Url};

use crate::core::error::{Error, Result};
use crate::core::source::resolve_output_filename;

/// What the probe learned about a resource
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceInfo {
    /// Declared total size in bytes
    pub content_length: u64,

    /// Filename from `Content-Disposition` or the final URL
    pub suggested_filename: String,

    /// URL after redirects
    pub final_url: Url,
}

/// Probe `url` for its length and suggested filename.
///
/// Every failure here is a [`Error::ProbeFailed`] (or
/// [`Error::RangeNotSupported`] when the server says so outright) and happens
/// before any file is created.
pub async fn probe(client: &Client, url: &Url) -> Result<ResourceInfo> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| Error::ProbeFailed(format!("cannot reach {url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::ProbeFailed(format!("{url} returned {status}")));
    }

    let headers = response.headers();

    let content_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| {
            Error::ProbeFailed(format!("{url} did not declare a content length"))
        })?;

    let refuses_ranges = headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("none"));
    if refuses_ranges {
        return Err(Error::RangeNotSupported(format!(
            "{url} answered with Accept-Ranges: none"
        )));
    }

    let content_disposition = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok());
    let final_url = response.url().clone();
    let suggested_filename = resolve_output_filename(content_disposition, &final_url);

    // Release the connection without reading the body
    drop(response);

    Ok(ResourceInfo {
        content_length,
        suggested_filename,
        final_url,
    })
}
