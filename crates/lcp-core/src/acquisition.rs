//! Acquisition of the publication referenced by a license
//!
//! `start` validates the publication link, allocates the destination file
//! and dispatches the download. Download events are forwarded to the
//! observer from a background task, which also verifies the content hash
//! once the download has ended.

use crate::crypto::CryptoProvider;
use crate::error::{LcpError, LcpResult, Status};
use crate::fs::{FileHandle, FileSystemProvider};
use crate::license::License;
use crate::net::{DownloadEvent, DownloadHandle, DownloadRequest, NetworkProvider};
use lcp_types::{Link, LinkKind, PUBLICATION_TYPE};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Share of the reported progress range given to the download itself;
/// the remainder is reported once the hash check has passed.
pub const DOWNLOAD_COEFFICIENT: f32 = 0.9;

/// Receives acquisition lifecycle notifications.
///
/// Callbacks run on the runtime's worker threads, not the caller's.
pub trait AcquisitionObserver: Send + Sync {
    fn on_started(&self) {}

    fn on_progressed(&self, _progress: f32) {}

    fn on_canceled(&self) {}

    fn on_ended(&self, _result: &Status) {}
}

/// One download attempt of a license's publication. Not reusable.
pub struct Acquisition {
    license: Arc<License>,
    fs: Arc<dyn FileSystemProvider>,
    net: Arc<dyn NetworkProvider>,
    crypto: Arc<dyn CryptoProvider>,
    publication_path: PathBuf,
    file: Option<Arc<FileHandle>>,
    request: Option<Arc<DownloadRequest>>,
    task: Option<JoinHandle<Status>>,
    started: bool,
}

impl Acquisition {
    pub fn new(
        license: Arc<License>,
        fs: Arc<dyn FileSystemProvider>,
        net: Arc<dyn NetworkProvider>,
        crypto: Arc<dyn CryptoProvider>,
        publication_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            license,
            fs,
            net,
            crypto,
            publication_path: publication_path.into(),
            file: None,
            request: None,
            task: None,
            started: false,
        }
    }

    /// Validate, allocate and dispatch. Returns once the download is
    /// running; its outcome is reported through `observer.on_ended`.
    pub async fn start(&mut self, observer: Arc<dyn AcquisitionObserver>) -> Status {
        if self.started {
            return Err(LcpError::AlreadyStarted);
        }
        self.started = true;

        let result = self.dispatch(observer).await;
        if let Err(e) = &result {
            warn!("Acquisition of license {} failed: {}", self.license.id(), e);
        }
        result
    }

    async fn dispatch(&mut self, observer: Arc<dyn AcquisitionObserver>) -> Status {
        let link = self
            .license
            .links()
            .get(LinkKind::Publication)
            .cloned()
            .ok_or(LcpError::NoAcquisitionLink)?;

        if link.mime_type != PUBLICATION_TYPE {
            return Err(LcpError::PublicationWrongType {
                expected: PUBLICATION_TYPE.to_string(),
                found: link.mime_type,
            });
        }

        let file = match self.fs.get_file(&self.publication_path).await {
            Ok(file) => Arc::new(file),
            Err(e) => {
                debug!("Cannot open {}: {}", self.publication_path.display(), e);
                return Err(LcpError::InvalidFilePath(self.publication_path.clone()));
            }
        };
        self.file = Some(Arc::clone(&file));

        let request = Arc::new(DownloadRequest::new(link.href.clone(), Arc::clone(&file)));
        info!(
            "Acquiring publication of license {} from {} (request {})",
            self.license.id(),
            link.href,
            request.id()
        );
        let handle = self.net.start_download(request).await?;
        self.request = Some(Arc::clone(handle.request()));

        let crypto = Arc::clone(&self.crypto);
        self.task = Some(tokio::spawn(forward_events(
            handle, observer, link, file, crypto,
        )));

        Ok(())
    }

    /// Flag the download as canceled. Termination is confirmed only by
    /// `on_canceled`.
    pub fn cancel(&self) {
        match &self.request {
            Some(request) => {
                info!("Cancel requested for download {}", request.id());
                request.set_canceled(true);
            }
            None => debug!("Cancel ignored, acquisition not started"),
        }
    }

    /// Wait for the download and its verification to finish. Safe to
    /// drop before completion and call again.
    pub async fn wait(&mut self) -> Status {
        let Some(task) = self.task.as_mut() else {
            return Err(LcpError::Fail("acquisition not running".to_string()));
        };
        let result = task
            .await
            .unwrap_or_else(|e| Err(LcpError::Fail(format!("acquisition task failed: {}", e))));
        self.task = None;
        result
    }

    pub fn publication_path(&self) -> &Path {
        self.file
            .as_ref()
            .map(|f| f.path())
            .unwrap_or(self.publication_path.as_path())
    }

    /// Name proposed for saving the publication, as known so far
    pub fn suggested_file_name(&self) -> String {
        match &self.request {
            Some(request) => request.suggested_file_name(),
            None => self
                .publication_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

/// Relay download events to the observer until a terminal event
async fn forward_events(
    mut handle: DownloadHandle,
    observer: Arc<dyn AcquisitionObserver>,
    link: Link,
    file: Arc<FileHandle>,
    crypto: Arc<dyn CryptoProvider>,
) -> Status {
    while let Some(event) = handle.next_event().await {
        match event {
            DownloadEvent::Started => observer.on_started(),
            DownloadEvent::Progressed(progress) => {
                observer.on_progressed(progress.clamp(0.0, 1.0) * DOWNLOAD_COEFFICIENT)
            }
            DownloadEvent::Canceled => {
                observer.on_canceled();
                return Err(LcpError::Canceled);
            }
            DownloadEvent::Ended(result) => {
                let result = match result {
                    Ok(()) => verify(&link, &file, crypto.as_ref()).await,
                    Err(e) => Err(e),
                };
                if result.is_ok() {
                    observer.on_progressed(1.0);
                }
                observer.on_ended(&result);
                return result;
            }
        }
    }

    let result = Err(LcpError::Fail(
        "download ended without a terminal event".to_string(),
    ));
    observer.on_ended(&result);
    result
}

async fn verify(link: &Link, file: &FileHandle, crypto: &dyn CryptoProvider) -> Status {
    let result = check_publication_hash(link, file, crypto).await;
    match &result {
        Ok(()) => info!("Publication {} verified", file.path().display()),
        Err(e) => warn!("Publication {} rejected: {}", file.path().display(), e),
    }
    result
}

/// Compare the file's digest with the link's hash. A link without a
/// hash always passes.
pub async fn check_publication_hash(
    link: &Link,
    file: &FileHandle,
    crypto: &dyn CryptoProvider,
) -> LcpResult<()> {
    let Some(expected) = link.expected_hash() else {
        return Ok(());
    };

    let raw = crypto.hash_file(file).await?;
    let actual = crypto.to_hex(&raw)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(LcpError::PublicationCorrupted {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
