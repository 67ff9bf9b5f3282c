//! Source resolution logic for rangefetch
//!
//! Validates the caller's URL into a [`FetchJob`] and derives a destination
//! filename when the caller did not supply one.

use std::path::{Path, PathBuf};

use reqwest::Url;

use crate::core::error::{Error, Result};

/// Name used when neither the response headers nor the URL suggest one
pub const FALLBACK_FILENAME: &str = "download";

/// Immutable description of one download
#[derive(Debug, Clone, PartialEq)]
pub struct FetchJob {
    /// Resource to fetch
    pub url: Url,

    /// Explicit destination; derived from the probe response when `None`
    pub destination: Option<PathBuf>,
}

impl FetchJob {
    /// Build a job from caller input. Only `http` and `https` URLs are accepted.
    pub fn new(url: &str, destination: Option<&Path>) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::InvalidInput(format!("invalid URL '{url}': {e}")))?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(Error::InvalidInput(format!(
                    "unsupported URL scheme '{scheme}' (expected http or https)"
                )))
            }
        }

        Ok(Self {
            url,
            destination: destination.map(Path::to_path_buf),
        })
    }

    /// Destination path: the explicit one, or `suggested` inside `output_dir`
    pub fn resolve_destination(&self, suggested: &str, output_dir: Option<&Path>) -> PathBuf {
        match &self.destination {
            Some(path) => path.clone(),
            None => match output_dir {
                Some(dir) => dir.join(suggested),
                None => PathBuf::from(suggested),
            },
        }
    }
}

/// Generates the output filename for a probed resource.
///
/// Priority: the `Content-Disposition` filename, then the last path segment
/// of the final (post-redirect) URL, then [`FALLBACK_FILENAME`].
pub fn resolve_output_filename(content_disposition: Option<&str>, final_url: &Url) -> String {
    content_disposition
        .and_then(parse_content_disposition_filename)
        .and_then(|name| sanitize_filename(&name))
        .or_else(|| filename_from_url(final_url))
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

/// Last non-empty, percent-decoded path segment of `url`
fn filename_from_url(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.rfind(|s| !s.is_empty())?;
    sanitize_filename(&percent_decode(segment))
}

/// Reduce a server-supplied name to a bare file name.
///
/// Directory components are dropped so the name cannot point outside the
/// output directory.
fn sanitize_filename(name: &str) -> Option<String> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim()
        .trim_matches('\0');

    match base {
        "" | "." | ".." => None,
        base => Some(base.to_string()),
    }
}

/// Extracts the filename from a raw `Content-Disposition` header value.
///
/// Handles quoted (`filename="a b.pdf"`) and token (`filename=a.pdf`) forms as
/// well as RFC 5987 `filename*=UTF-8''...`, which wins when both are present.
pub fn parse_content_disposition_filename(header_value: &str) -> Option<String> {
    let mut plain: Option<String> = None;

    for param in split_params(header_value).into_iter().skip(1) {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();

        match name.as_str() {
            "filename*" => {
                let Some((charset, rest)) = value.split_once('\'') else {
                    continue;
                };
                // Skip the language tag
                let Some((_, encoded)) = rest.split_once('\'') else {
                    continue;
                };
                if charset.eq_ignore_ascii_case("utf-8") {
                    let decoded = percent_decode(encoded);
                    if !decoded.is_empty() {
                        return Some(decoded);
                    }
                }
            }
            "filename" => {
                let unquoted = unquote(value);
                if !unquoted.is_empty() {
                    plain = Some(unquoted);
                }
            }
            _ => {}
        }
    }

    plain
}

/// Split a header value on `;`, ignoring separators inside quoted strings
fn split_params(value: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                params.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(value[start..].trim());
    params
}

/// Strip surrounding quotes and backslash escapes from a parameter value
fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Decode `%XX` escapes; malformed escapes are kept verbatim
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(high), Some(low)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                out.push(high << 4 | low);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
