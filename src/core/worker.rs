//! Per-range worker
//!
//! Requests one byte range and streams it into the shared file, one
//! positional write per chunk, never past the end of its own range.

use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode, Url};
use tokio_util::sync::CancellationToken;

use crate::core::error::{Error, Result};
use crate::core::range::ByteRange;
use crate::core::storage::SharedFile;
use crate::core::stream::{create_http_stream, fill_chunk};

/// How a worker's range ended
#[derive(Debug)]
pub enum WorkerOutcome {
    /// Every byte of the range was written
    Completed { range: ByteRange, bytes: u64 },
    /// The range could not be fetched; other ranges are unaffected
    RequestFailed { range: ByteRange, error: Error },
    /// The download cannot complete: a write failed or the server ignored
    /// the range
    Fatal { range: ByteRange, error: Error },
    /// Stopped early because a sibling failed fatally
    Cancelled { range: ByteRange },
}

impl WorkerOutcome {
    /// Range this outcome belongs to
    pub fn range(&self) -> ByteRange {
        match self {
            WorkerOutcome::Completed { range, .. }
            | WorkerOutcome::RequestFailed { range, .. }
            | WorkerOutcome::Fatal { range, .. }
            | WorkerOutcome::Cancelled { range } => *range,
        }
    }
}

/// Fetch `range` of `url` into `file`, stopping early if `cancel` fires
pub async fn fetch_range(
    client: Client,
    url: Url,
    range: ByteRange,
    file: SharedFile,
    chunk_size: usize,
    cancel: CancellationToken,
) -> WorkerOutcome {
    log::debug!("range {range}: starting");

    match stream_range(&client, &url, range, &file, chunk_size, &cancel).await {
        Ok(bytes) => {
            log::debug!("range {range}: {bytes} bytes written");
            WorkerOutcome::Completed { range, bytes }
        }
        Err(Error::Cancelled) => {
            log::debug!("range {range}: cancelled");
            WorkerOutcome::Cancelled { range }
        }
        Err(error) if error.is_fatal() => WorkerOutcome::Fatal { range, error },
        Err(error) => {
            log::warn!("request {url} range {range} error: {error}");
            WorkerOutcome::RequestFailed { range, error }
        }
    }
}

async fn stream_range(
    client: &Client,
    url: &Url,
    range: ByteRange,
    file: &SharedFile,
    chunk_size: usize,
    cancel: &CancellationToken,
) -> Result<u64> {
    let request = client
        .get(url.clone())
        .header(RANGE, range.header_value())
        .send();

    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        response = request => response?,
    };

    match response.status() {
        StatusCode::PARTIAL_CONTENT => {}
        StatusCode::OK => {
            return Err(Error::RangeNotSupported(format!(
                "{url} ignored the Range header for {range} and sent the whole body"
            )))
        }
        status => {
            return Err(Error::HttpError(format!(
                "range {range} request failed: {status}"
            )))
        }
    }

    // A 206 for some other slice would land at the wrong offset
    let content_range = response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("(missing)")
        .to_string();
    if !content_range_matches(&content_range, range, file.len()) {
        return Err(Error::RangeNotSupported(format!(
            "{url} answered range {range} with Content-Range {content_range}"
        )));
    }

    let expected = range.len();
    let mut stream = create_http_stream(response);
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut written = 0u64;

    loop {
        let filled = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            read = fill_chunk(&mut stream, &mut buffer) => read.map_err(|e| {
                Error::NetworkError(format!("range {range} stream read error: {e}"))
            })?,
        };
        if filled == 0 {
            break;
        }

        // The write must stay inside this worker's range
        if written + filled as u64 > expected {
            return Err(Error::HttpError(format!(
                "range {range} body is longer than the {expected} bytes requested"
            )));
        }

        buffer = file.write_at(range.start + written, buffer, filled).await?;
        written += filled as u64;
    }

    if written != expected {
        return Err(Error::NetworkError(format!(
            "range {range} ended after {written} of {expected} bytes"
        )));
    }

    Ok(written)
}

/// Parse `bytes <start>-<end>/<total>`; the total may be `*`
fn parse_content_range(value: &str) -> Option<(u64, u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes ")?;
    let (span, total) = rest.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    let total = match total.trim() {
        "*" => None,
        total => Some(total.parse().ok()?),
    };
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?, total))
}

fn content_range_matches(value: &str, range: ByteRange, total: u64) -> bool {
    match parse_content_range(value) {
        Some((start, end, served_total)) => {
            start == range.start
                && end == range.end
                && (served_total.is_none() || served_total == Some(total))
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn body() -> Vec<u8> {
        (0..1000u32).map(|i| (i % 251) as u8).collect()
    }

    /// 206 reply for the `100-399` range of a 1000 byte resource
    fn partial(bytes: &[u8]) -> ResponseTemplate {
        ResponseTemplate::new(206)
            .insert_header("content-range", "bytes 100-399/1000")
            .set_body_bytes(bytes.to_vec())
    }

    /// Origin that sends the 206 head and the first `sent` body bytes of the
    /// `100-399` range, then stops sending without closing the connection
    async fn stalling_origin(data: Vec<u8>, sent: usize) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let _ = socket.read(&mut request).await;
            let head = "HTTP/1.1 206 Partial Content\r\n\
                        content-length: 300\r\n\
                        content-range: bytes 100-399/1000\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&data[100..100 + sent]).await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        Url::parse(&format!("http://{addr}/data.bin")).unwrap()
    }

    async fn setup(template: ResponseTemplate) -> (MockServer, Url) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.bin"))
            .and(header("range", "bytes=100-399"))
            .respond_with(template)
            .mount(&server)
            .await;
        let url = Url::parse(&format!("{}/data.bin", server.uri())).unwrap();
        (server, url)
    }

    #[tokio::test]
    async fn test_range_written_at_its_offset() {
        let data = body();
        let (_server, url) =
            setup(partial(&data[100..400])).await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let file = SharedFile::create(&dest, 1000).await.unwrap();

        // A small chunk size forces several positional writes
        let outcome = fetch_range(
            Client::new(),
            url,
            ByteRange::new(100, 399),
            file.clone(),
            64,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(outcome, WorkerOutcome::Completed { bytes: 300, .. }));
        file.finish().await.unwrap();

        let written = std::fs::read(&dest).unwrap();
        assert_eq!(&written[100..400], &data[100..400]);
        assert!(written[..100].iter().all(|b| *b == 0));
        assert!(written[400..].iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_full_body_reply_is_fatal() {
        let (_server, url) = setup(ResponseTemplate::new(200).set_body_bytes(body())).await;
        let dir = tempdir().unwrap();
        let file = SharedFile::create(&dir.path().join("out.bin"), 1000).await.unwrap();

        let outcome = fetch_range(
            Client::new(),
            url,
            ByteRange::new(100, 399),
            file,
            64,
            CancellationToken::new(),
        )
        .await;

        match outcome {
            WorkerOutcome::Fatal { error, .. } => {
                assert!(matches!(error, Error::RangeNotSupported(_)))
            }
            other => panic!("expected fatal outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_request_failure() {
        let (_server, url) = setup(ResponseTemplate::new(503)).await;
        let dir = tempdir().unwrap();
        let file = SharedFile::create(&dir.path().join("out.bin"), 1000).await.unwrap();

        let outcome = fetch_range(
            Client::new(),
            url,
            ByteRange::new(100, 399),
            file,
            64,
            CancellationToken::new(),
        )
        .await;

        match outcome {
            WorkerOutcome::RequestFailed { range, error } => {
                assert_eq!(range, ByteRange::new(100, 399));
                assert!(error.to_string().contains("503"));
            }
            other => panic!("expected request failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_overlong_body_never_passes_range_end() {
        let data = body();
        let (_server, url) =
            setup(partial(&data[100..500])).await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let file = SharedFile::create(&dest, 1000).await.unwrap();

        let outcome = fetch_range(
            Client::new(),
            url,
            ByteRange::new(100, 399),
            file.clone(),
            100,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(outcome, WorkerOutcome::RequestFailed { .. }));
        file.finish().await.unwrap();
        let written = std::fs::read(&dest).unwrap();
        assert!(written[400..].iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_short_body_is_request_failure() {
        let data = body();
        let (_server, url) =
            setup(partial(&data[100..200])).await;
        let dir = tempdir().unwrap();
        let file = SharedFile::create(&dir.path().join("out.bin"), 1000).await.unwrap();

        let outcome = fetch_range(
            Client::new(),
            url,
            ByteRange::new(100, 399),
            file,
            64,
            CancellationToken::new(),
        )
        .await;

        match outcome {
            WorkerOutcome::RequestFailed { error, .. } => {
                assert!(error.to_string().contains("100 of 300"))
            }
            other => panic!("expected request failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_response() {
        let (_server, url) = setup(
            partial(&body()[100..400]).set_delay(Duration::from_secs(30)),
        )
        .await;
        let dir = tempdir().unwrap();
        let file = SharedFile::create(&dir.path().join("out.bin"), 1000).await.unwrap();
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(fetch_range(
            Client::new(),
            url,
            ByteRange::new(100, 399),
            file,
            64,
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker did not stop after cancellation")
            .unwrap();
        assert!(matches!(outcome, WorkerOutcome::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_write_error_is_fatal() {
        let data = body();
        let (_server, url) =
            setup(partial(&data[100..400])).await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("ro.bin");
        std::fs::write(&dest, vec![0u8; 1000]).unwrap();
        let file = SharedFile::from_std(std::fs::File::open(&dest).unwrap(), dest.clone(), 1000);

        let outcome = fetch_range(
            Client::new(),
            url,
            ByteRange::new(100, 399),
            file,
            64,
            CancellationToken::new(),
        )
        .await;

        match outcome {
            WorkerOutcome::Fatal { error, range } => {
                assert_eq!(range.start, 100);
                assert!(matches!(error, Error::WriteFailed { offset: 100, .. }));
            }
            other => panic!("expected write failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mismatched_content_range_is_fatal() {
        let data = body();
        let (_server, url) = setup(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 0-299/1000")
                .set_body_bytes(data[..300].to_vec()),
        )
        .await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let file = SharedFile::create(&dest, 1000).await.unwrap();

        let outcome = fetch_range(
            Client::new(),
            url,
            ByteRange::new(100, 399),
            file.clone(),
            64,
            CancellationToken::new(),
        )
        .await;

        match outcome {
            WorkerOutcome::Fatal { error, .. } => {
                assert!(matches!(error, Error::RangeNotSupported(ref msg) if msg.contains("bytes 0-299/1000")))
            }
            other => panic!("expected fatal outcome, got {other:?}"),
        }
        file.finish().await.unwrap();
        assert!(std::fs::read(&dest).unwrap().iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_missing_content_range_is_fatal() {
        let (_server, url) =
            setup(ResponseTemplate::new(206).set_body_bytes(body()[100..400].to_vec())).await;
        let dir = tempdir().unwrap();
        let file = SharedFile::create(&dir.path().join("out.bin"), 1000).await.unwrap();

        let outcome = fetch_range(
            Client::new(),
            url,
            ByteRange::new(100, 399),
            file,
            64,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(outcome, WorkerOutcome::Fatal { .. }));
        assert_eq!(outcome.range(), ByteRange::new(100, 399));
    }

    #[test]
    fn test_content_range_matching() {
        let range = ByteRange::new(100, 399);
        assert!(content_range_matches("bytes 100-399/1000", range, 1000));
        assert!(content_range_matches("bytes 100-399/*", range, 1000));
        assert!(!content_range_matches("bytes 0-299/1000", range, 1000));
        assert!(!content_range_matches("bytes 100-399/2000", range, 1000));
        assert!(!content_range_matches("bytes 100-400/1000", range, 1000));
        assert!(!content_range_matches("(missing)", range, 1000));
        assert!(!content_range_matches("items 100-399/1000", range, 1000));
    }

    #[tokio::test]
    async fn test_cancelled_mid_stream() {
        let data = body();
        let url = stalling_origin(data.clone(), 100).await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let file = SharedFile::create(&dest, 1000).await.unwrap();
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(fetch_range(
            Client::new(),
            url,
            ByteRange::new(100, 399),
            file.clone(),
            64,
            cancel.clone(),
        ));

        // Wait until the first full chunk is on disk, then cancel while the
        // worker waits for the rest of the body
        let deadline = Instant::now() + Duration::from_secs(5);
        while std::fs::read(&dest).unwrap()[100..164] != data[100..164] {
            assert!(Instant::now() < deadline, "first chunk was never written");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker did not stop after cancellation")
            .unwrap();
        assert!(matches!(outcome, WorkerOutcome::Cancelled { .. }));

        file.finish().await.unwrap();
        let written = std::fs::read(&dest).unwrap();
        assert!(written[164..].iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_stalled_body_hits_read_timeout() {
        let url = stalling_origin(body(), 100).await;
        let dir = tempdir().unwrap();
        let file = SharedFile::create(&dir.path().join("out.bin"), 1000).await.unwrap();
        let client = Client::builder()
            .read_timeout(Duration::from_millis(200))
            .build()
            .unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            fetch_range(
                client,
                url,
                ByteRange::new(100, 399),
                file,
                64,
                CancellationToken::new(),
            ),
        )
        .await
        .expect("stalled body was never timed out");

        match outcome {
            WorkerOutcome::RequestFailed { error, .. } => {
                assert!(matches!(error, Error::NetworkError(_)), "got {error:?}")
            }
            other => panic!("expected request failure, got {other:?}"),
        }
    }
}
