//! Network side of acquisition
//!
//! A download is dispatched as a [`DownloadRequest`]; the network provider
//! hands back a [`DownloadHandle`] carrying the cancel flag and the stream
//! of [`DownloadEvent`]s for that request only.

use crate::error::{LcpError, LcpResult, Status};
use crate::fs::FileHandle;
use async_trait::async_trait;
use futures::StreamExt;
use lcp_types::LcpConfig;
use parking_lot::RwLock;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

const DEFAULT_FILE_NAME: &str = "publication.epub";

/// Lifecycle of one download, in emission order
#[derive(Debug)]
pub enum DownloadEvent {
    Started,
    /// Raw progress in [0, 1]
    Progressed(f32),
    Canceled,
    Ended(Status),
}

/// One download job: a source href bound to a destination file
#[derive(Debug)]
pub struct DownloadRequest {
    id: Uuid,
    url: String,
    file: Arc<FileHandle>,
    canceled: AtomicBool,
    suggested_file_name: RwLock<String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, file: Arc<FileHandle>) -> Self {
        let url = url.into();
        let suggested = file_name_from_url(&url).unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());
        Self {
            id: Uuid::new_v4(),
            url,
            file,
            canceled: AtomicBool::new(false),
            suggested_file_name: RwLock::new(suggested),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn file(&self) -> &Arc<FileHandle> {
        &self.file
    }

    pub fn set_canceled(&self, canceled: bool) {
        self.canceled.store(canceled, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    pub fn suggested_file_name(&self) -> String {
        self.suggested_file_name.read().clone()
    }

    pub fn set_suggested_file_name(&self, name: impl Into<String>) {
        *self.suggested_file_name.write() = name.into();
    }
}

/// Cancellable handle plus event stream of a dispatched download
#[derive(Debug)]
pub struct DownloadHandle {
    request: Arc<DownloadRequest>,
    events: mpsc::UnboundedReceiver<DownloadEvent>,
}

impl DownloadHandle {
    pub fn new(
        request: Arc<DownloadRequest>,
        events: mpsc::UnboundedReceiver<DownloadEvent>,
    ) -> Self {
        Self { request, events }
    }

    /// The request being driven; its cancel flag stops the download
    pub fn request(&self) -> &Arc<DownloadRequest> {
        &self.request
    }

    pub async fn next_event(&mut self) -> Option<DownloadEvent> {
        self.events.recv().await
    }
}

/// Dispatches downloads asynchronously
#[async_trait]
pub trait NetworkProvider: Send + Sync {
    async fn start_download(&self, request: Arc<DownloadRequest>) -> LcpResult<DownloadHandle>;
}

/// HTTP downloads with reqwest
#[derive(Debug, Clone)]
pub struct HttpNetProvider {
    client: Client,
    progress_interval: Duration,
}

enum Transfer {
    Completed,
    Canceled,
}

impl HttpNetProvider {
    pub fn new(config: &LcpConfig) -> LcpResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.read_timeout_secs))
            .build()?;

        Ok(Self::with_client(
            client,
            Duration::from_millis(config.progress_interval_ms),
        ))
    }

    /// Provider over a preconfigured client
    pub fn with_client(client: Client, progress_interval: Duration) -> Self {
        Self {
            client,
            progress_interval,
        }
    }
}

#[async_trait]
impl NetworkProvider for HttpNetProvider {
    async fn start_download(&self, request: Arc<DownloadRequest>) -> LcpResult<DownloadHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let interval = self.progress_interval;
        let task_request = Arc::clone(&request);

        tokio::spawn(async move {
            let id = task_request.id();
            info!("Spawned download task {}: {}", id, task_request.url());
            let _ = tx.send(DownloadEvent::Started);

            match transfer(&client, &task_request, &tx, interval).await {
                Ok(Transfer::Completed) => {
                    info!("Download {} completed", id);
                    let _ = tx.send(DownloadEvent::Ended(Ok(())));
                }
                Ok(Transfer::Canceled) => {
                    info!("Download {} cancelled", id);
                    let _ = tx.send(DownloadEvent::Canceled);
                }
                Err(e) => {
                    error!("Download {} failed: {}", id, e);
                    let _ = tx.send(DownloadEvent::Ended(Err(e)));
                }
            }
        });

        Ok(DownloadHandle::new(request, rx))
    }
}

/// Stream the response body into the request's file
async fn transfer(
    client: &Client,
    request: &DownloadRequest,
    tx: &mpsc::UnboundedSender<DownloadEvent>,
    interval: Duration,
) -> LcpResult<Transfer> {
    if request.is_canceled() {
        return Ok(Transfer::Canceled);
    }

    let response = client.get(request.url()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(LcpError::ServerError {
            status: status.as_u16(),
            url: request.url().to_string(),
        });
    }

    if let Some(name) = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(file_name_from_disposition)
    {
        debug!("Download {}: server suggests {}", request.id(), name);
        request.set_suggested_file_name(name);
    }

    let total = response.content_length().unwrap_or(0);
    let mut stream = response.bytes_stream();
    let mut downloaded = 0u64;
    let mut last_progress_time = Instant::now();

    while let Some(chunk_result) = stream.next().await {
        if request.is_canceled() {
            return Ok(Transfer::Canceled);
        }

        let chunk = chunk_result?;
        request.file().write_all(&chunk).await?;
        downloaded += chunk.len() as u64;

        if total > 0 && last_progress_time.elapsed() >= interval {
            let progress = (downloaded as f64 / total as f64).min(1.0) as f32;
            let _ = tx.send(DownloadEvent::Progressed(progress));
            last_progress_time = Instant::now();
        }
    }

    request.file().sync().await?;
    let _ = tx.send(DownloadEvent::Progressed(1.0));

    Ok(Transfer::Completed)
}

/// Last non-empty path segment of a URL, percent-decoded
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = urlencoding::decode(segment).ok()?;
    Some(decoded.into_owned())
}

/// `filename` parameter of a Content-Disposition header
pub fn file_name_from_disposition(header: &str) -> Option<String> {
    header
        .split("filename=")
        .nth(1)
        .map(|s| s.split(';').next().unwrap_or(s))
        .map(|s| s.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileSystemProvider, LocalFileSystem};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers a single request with `head`, then `body` in `chunks`
    /// writes spaced by `delay`. Returns the URL to fetch.
    async fn serve_once(head: String, body: Vec<u8>, chunks: usize, delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }

            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            let size = (body.len() / chunks.max(1)).max(1);
            for chunk in body.chunks(size) {
                if socket.write_all(chunk).await.is_err() || socket.flush().await.is_err() {
                    return;
                }
                tokio::time::sleep(delay).await;
            }
        });

        format!("http://{}/books/moby.epub", addr)
    }

    fn ok_head(length: usize, disposition: Option<&str>) -> String {
        let mut head = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n", length);
        if let Some(disposition) = disposition {
            head.push_str(&format!("Content-Disposition: {}\r\n", disposition));
        }
        head.push_str("Connection: close\r\n\r\n");
        head
    }

    fn provider() -> HttpNetProvider {
        let client = Client::builder().no_proxy().build().unwrap();
        HttpNetProvider::with_client(client, Duration::ZERO)
    }

    async fn request_into(dir: &std::path::Path, url: String) -> Arc<DownloadRequest> {
        let file = LocalFileSystem.get_file(&dir.join("out.epub")).await.unwrap();
        Arc::new(DownloadRequest::new(url, Arc::new(file)))
    }

    async fn drain(handle: &mut DownloadHandle) -> Vec<DownloadEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn http_download_writes_body_and_ends() {
        let dir = tempfile::tempdir().unwrap();
        let body = vec![7u8; 4096];
        let url = serve_once(
            ok_head(body.len(), Some(r#"attachment; filename="moby-dick.epub""#)),
            body.clone(),
            4,
            Duration::from_millis(5),
        )
        .await;

        let request = request_into(dir.path(), url).await;
        assert_eq!(request.suggested_file_name(), "moby.epub");
        let mut handle = provider().start_download(Arc::clone(&request)).await.unwrap();
        let events = drain(&mut handle).await;

        assert!(matches!(events.first(), Some(DownloadEvent::Started)));
        assert!(matches!(events.last(), Some(DownloadEvent::Ended(Ok(())))));
        assert!(matches!(
            events[events.len() - 2],
            DownloadEvent::Progressed(p) if p == 1.0
        ));
        let progress: Vec<f32> = events
            .iter()
            .filter_map(|e| match e {
                DownloadEvent::Progressed(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert!(progress.iter().all(|p| (0.0..=1.0).contains(p)));

        assert_eq!(request.suggested_file_name(), "moby-dick.epub");
        assert_eq!(std::fs::read(dir.path().join("out.epub")).unwrap(), body);
    }

    #[tokio::test]
    async fn http_error_status_ends_with_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let head = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        let url = serve_once(head.to_string(), Vec::new(), 1, Duration::ZERO).await;

        let request = request_into(dir.path(), url.clone()).await;
        let mut handle = provider().start_download(request).await.unwrap();
        let events = drain(&mut handle).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], DownloadEvent::Started));
        match &events[1] {
            DownloadEvent::Ended(Err(LcpError::ServerError { status, url: failed })) => {
                assert_eq!(*status, 404);
                assert_eq!(failed, &url);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn canceled_flag_stops_http_download() {
        let dir = tempfile::tempdir().unwrap();
        let body = vec![1u8; 64 * 1024];
        let url = serve_once(ok_head(body.len(), None), body, 64, Duration::from_millis(50)).await;

        let request = request_into(dir.path(), url).await;
        let mut handle = provider().start_download(request).await.unwrap();

        assert!(matches!(handle.next_event().await, Some(DownloadEvent::Started)));
        assert!(matches!(handle.next_event().await, Some(DownloadEvent::Progressed(_))));
        handle.request().set_canceled(true);

        let rest = drain(&mut handle).await;
        assert!(matches!(rest.last(), Some(DownloadEvent::Canceled)));
        assert!(!rest.iter().any(|e| matches!(e, DownloadEvent::Ended(_))));
    }

    #[test]
    fn file_name_comes_from_last_segment() {
        assert_eq!(
            file_name_from_url("https://cdn.example/books/My%20Book.epub?token=1").as_deref(),
            Some("My Book.epub")
        );
        assert_eq!(
            file_name_from_url("https://cdn.example/books/").as_deref(),
            Some("books")
        );
        assert_eq!(file_name_from_url("https://cdn.example"), None);
        assert_eq!(file_name_from_url("not a url"), None);
    }

    #[test]
    fn file_name_from_content_disposition() {
        assert_eq!(
            file_name_from_disposition(r#"attachment; filename="moby.epub"; size=12"#).as_deref(),
            Some("moby.epub")
        );
        assert_eq!(file_name_from_disposition("inline"), None);
    }

    #[tokio::test]
    async fn request_falls_back_to_default_name() {
        let dir = tempfile::tempdir().unwrap();
        let file = LocalFileSystem
            .get_file(&dir.path().join("out.epub"))
            .await
            .unwrap();
        let request = DownloadRequest::new("urn:isbn:123", Arc::new(file));
        assert_eq!(request.suggested_file_name(), DEFAULT_FILE_NAME);
        assert!(!request.is_canceled());
        request.set_canceled(true);
        assert!(request.is_canceled());
    }
}
