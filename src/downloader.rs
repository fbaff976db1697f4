use crate::error::{ErrContext, FetchError};
use crate::models::Progress;
use futures::TryStreamExt;
use reqwest::{Client, Response, StatusCode};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, BufReader};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Overall budget for one request, from send until the body is fully read.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Size of each read from the response body.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Progress sink invoked after every chunk written to disk.
pub type ProgressFn<'a> = &'a mut (dyn FnMut(Progress) + Send);

#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self { client })
    }

    /// Downloads `url` into `target` and returns the absolute path of the saved file.
    ///
    /// `target` is first resolved with [`resolve_path`]. Its parent directory is
    /// created when missing and an existing file is truncated. Only a `200 OK`
    /// response is accepted; the destination is not touched for any other status.
    ///
    /// If the copy fails part-way (read or write error, cancellation, or fewer
    /// bytes than the declared content length) the partial file is removed.
    pub async fn fetch(
        &self,
        url: &str,
        target: &Path,
        progress: Option<ProgressFn<'_>>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, FetchError> {
        validate_url(url)?;
        let target = resolve_path(target).context("failed to compute absolute path")?;

        if let Some(dir) = target.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).context("failed to create directory")?;
        }

        info!(url, target = %target.display(), "starting download");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            response = self.client.get(url).send() => response?,
        };

        let status = response.status();
        if status != StatusCode::OK {
            debug!(url, %status, "download rejected by remote");
            return Err(FetchError::Remote {
                status: status.as_u16(),
            });
        }

        let total = response.content_length();
        let mut file = File::create(&target).context("failed to create file")?;

        let copied = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            copied = copy_body(response, &mut file, total, progress) => copied,
        };

        let written = match copied.and_then(|written| check_length(written, total)) {
            Ok(written) => written,
            Err(err) => {
                drop(file);
                discard_partial(&target);
                return Err(err);
            }
        };

        info!(url, path = %target.display(), bytes = written, "download complete");

        Ok(target)
    }
}

/// Only plain `http://` and `https://` URLs are fetched; the check is case-sensitive.
pub fn validate_url(url: &str) -> Result<(), FetchError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(FetchError::InvalidInput(
            "url must start with http:// or https://".to_string(),
        ))
    }
}

/// Absolute form of `path` with `.` and `..` segments removed lexically.
///
/// Symlinks are not followed, so `a/link/..` becomes `a`.
pub fn resolve_path(path: &Path) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;

    Ok(absolute
        .components()
        .fold(PathBuf::new(), |mut resolved, component| {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    resolved.pop();
                }
                other => resolved.push(other),
            }
            resolved
        }))
}

async fn copy_body(
    response: Response,
    file: &mut File,
    total: Option<u64>,
    mut progress: Option<ProgressFn<'_>>,
) -> Result<u64, FetchError> {
    let stream = response.bytes_stream().map_err(io::Error::other);
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, StreamReader::new(stream));
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;

    loop {
        let n = reader.read(&mut buf).await.context("read error")?;
        if n == 0 {
            break;
        }

        file.write_all(&buf[..n]).context("failed to write file")?;
        written += n as u64;

        trace!(written, ?total, "chunk written");
        if let Some(report) = progress.as_deref_mut() {
            report(Progress { written, total });
        }
    }

    file.flush().context("failed to write file")?;

    Ok(written)
}

fn check_length(written: u64, total: Option<u64>) -> Result<u64, FetchError> {
    match total {
        Some(expected) if expected != written => Err(FetchError::Incomplete { expected, written }),
        _ => Ok(written),
    }
}

fn discard_partial(target: &Path) {
    match fs::remove_file(target) {
        Ok(()) => debug!(target = %target.display(), "removed partial download"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(
            target = %target.display(),
            error = %err,
            "failed to remove partial download"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn downloader() -> Downloader {
        Downloader::new().unwrap()
    }

    /// Answers a single request with `response` verbatim, then closes the connection.
    async fn serve_raw(response: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response).await.unwrap();
            socket.shutdown().await.ok();
        });

        format!("http://{addr}/video.mp4")
    }

    #[test]
    fn resolve_path_removes_dot_segments() {
        assert_eq!(
            resolve_path(Path::new("/a/b/../c/./d.mp4")).unwrap(),
            Path::new("/a/c/d.mp4")
        );
        assert_eq!(resolve_path(Path::new("/../x")).unwrap(), Path::new("/x"));

        let relative = resolve_path(Path::new("videos/../v.mp4")).unwrap();
        assert!(relative.is_absolute());
        assert_eq!(relative, std::env::current_dir().unwrap().join("v.mp4"));
    }

    #[test]
    fn only_http_schemes_are_accepted() {
        assert!(validate_url("http://example.com/a").is_ok());
        assert!(validate_url("https://example.com/a").is_ok());

        for url in ["", "ftp://example.com/a", "HTTP://example.com/a", "file:///etc/passwd"] {
            let err = validate_url(url).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{url}");
        }
    }

    #[test]
    fn length_mismatch_is_an_error() {
        assert_eq!(check_length(10, Some(10)).unwrap(), 10);
        assert_eq!(check_length(10, None).unwrap(), 10);

        let err = check_length(4, Some(10)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[tokio::test]
    async fn invalid_scheme_performs_no_io() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested").join("x.mp4");

        let err = downloader()
            .fetch("ftp://example.com/video.mp4", &target, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(!dir.path().join("nested").exists());
    }

    #[tokio::test]
    async fn downloads_body_into_nested_directory() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/video.mp4")
            .with_status(200)
            .with_body("test-bytes")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a").join("b").join("video.mp4");
        let url = format!("{}/video.mp4", server.url());

        let saved = downloader()
            .fetch(&url, &target, None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(saved.is_absolute());
        assert_eq!(std::fs::read(&saved).unwrap(), b"test-bytes");
    }

    #[tokio::test]
    async fn parent_segments_are_resolved_before_saving() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v.mp4")
            .with_status(200)
            .with_body("test-bytes")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("stray").join("..").join("videos").join("v.mp4");
        let url = format!("{}/v.mp4", server.url());

        let saved = downloader()
            .fetch(&url, &target, None, &CancellationToken::new())
            .await
            .unwrap();

        let expected = resolve_path(&dir.path().join("videos").join("v.mp4")).unwrap();
        assert_eq!(saved, expected);
        assert_eq!(std::fs::read(&saved).unwrap(), b"test-bytes");
        assert!(!dir.path().join("stray").exists());
    }

    #[tokio::test]
    async fn truncated_body_removes_partial_file() {
        let url = serve_raw(
            b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\n0123456789",
        )
        .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("video.mp4");

        let err = downloader()
            .fetch(&url, &target, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn chunked_body_reports_unknown_total() {
        let url = serve_raw(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n\
              5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        )
        .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("video.mp4");

        let mut reports = Vec::new();
        let mut record = |progress: Progress| reports.push(progress);
        let saved = downloader()
            .fetch(&url, &target, Some(&mut record), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(saved).unwrap(), "hello world");
        assert!(!reports.is_empty());
        assert!(reports.iter().all(|report| report.total.is_none()));
        assert_eq!(reports.last().unwrap().written, 11);
    }

    #[tokio::test]
    async fn existing_file_is_truncated() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/short.bin")
            .with_status(200)
            .with_body("new")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("short.bin");
        std::fs::write(&target, "a much longer previous content").unwrap();

        let url = format!("{}/short.bin", server.url());
        let saved = downloader()
            .fetch(&url, &target, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(saved).unwrap(), "new");
    }

    #[tokio::test]
    async fn progress_is_reported_per_chunk() {
        let body = vec![7u8; 150_000];
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/big.bin")
            .with_status(200)
            .with_body(&body)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("big.bin");
        let url = format!("{}/big.bin", server.url());

        let mut reports = Vec::new();
        let mut record = |progress: Progress| reports.push(progress);
        let saved = downloader()
            .fetch(&url, &target, Some(&mut record), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(saved).unwrap(), body);
        assert!(reports.len() >= 3);

        let mut previous = 0;
        for report in &reports {
            assert_eq!(report.total, Some(150_000));
            assert!(report.written > previous);
            assert!(report.written - previous <= CHUNK_SIZE as u64);
            previous = report.written;
        }
        assert_eq!(previous, 150_000);
    }

    #[tokio::test]
    async fn non_ok_status_is_a_remote_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing.mp4")
            .with_status(404)
            .with_body("not found")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("missing.mp4");
        let url = format!("{}/missing.mp4", server.url());

        let err = downloader()
            .fetch(&url, &target, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Remote);
        assert_eq!(err.status(), Some(404));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn accepted_but_not_ok_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/partial.mp4")
            .with_status(206)
            .with_body("part")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let url = format!("{}/partial.mp4", server.url());

        let err = downloader()
            .fetch(&url, &dir.path().join("partial.mp4"), None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(206));
    }

    #[tokio::test]
    async fn directory_creation_failure_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let err = downloader()
            .fetch(
                "https://example.com/video.mp4",
                &blocker.join("video.mp4"),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().starts_with("failed to create directory"));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        let dir = TempDir::new().unwrap();

        let err = downloader()
            .fetch(
                "http://127.0.0.1:1/video.mp4",
                &dir.path().join("video.mp4"),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/video.mp4")
            .with_status(200)
            .with_body("test-bytes")
            .expect(0)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("video.mp4");
        let url = format!("{}/video.mp4", server.url());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = downloader()
            .fetch(&url, &target, None, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
        assert!(!target.exists());
        mock.assert_async().await;
    }
}
