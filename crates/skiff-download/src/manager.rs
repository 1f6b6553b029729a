//! Downloads manager
//!
//! Builds downloads from responses, drives their transfer on a spawned task
//! and finalizes storage once the session signals completion.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use crate::download::{Download, DownloadFailure, DownloadId, DownloadState};
use crate::error::DownloadError;
use crate::events::{DownloadFinished, EventBus, Subscription};
use crate::http::filename_from_url;
use crate::policy::StoragePolicyClassifier;
use crate::registry::DownloadRegistry;
use crate::sanitize::FilenameSanitizer;
use crate::session::{Completion, ResponseMetadata, TransferSession};
use crate::Result;

const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

#[cfg(unix)]
const CROSS_DEVICE_ERROR: i32 = 18; // EXDEV
#[cfg(windows)]
const CROSS_DEVICE_ERROR: i32 = 17; // ERROR_NOT_SAME_DEVICE

/// Where downloads live on disk.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// In-flight and temporary-policy files
    pub temp_dir: PathBuf,
    /// Permanent-policy files
    pub downloads_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(temp_dir: impl Into<PathBuf>, downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            downloads_dir: downloads_dir.into(),
        }
    }

    /// Per-download subdirectory, so equal filenames never share a file
    pub fn working_dir(&self, id: DownloadId) -> PathBuf {
        self.temp_dir.join(id.to_string())
    }

    pub fn working_path(&self, id: DownloadId, filename: &str) -> PathBuf {
        self.working_dir(id).join(filename)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TransferControl {
    Continue,
    Cancel,
}

/// A constructed download paired with the session that will transfer it.
///
/// Nothing is registered and no I/O has happened yet.
pub struct PendingDownload {
    download: Download,
    session: Arc<dyn TransferSession>,
}

impl PendingDownload {
    pub fn download(&self) -> &Download {
        &self.download
    }

    pub fn into_download(self) -> Download {
        self.download
    }
}

impl Deref for PendingDownload {
    type Target = Download;

    fn deref(&self) -> &Download {
        &self.download
    }
}

impl std::fmt::Debug for PendingDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingDownload")
            .field("download", &self.download)
            .finish_non_exhaustive()
    }
}

pub struct DownloadsManager {
    /// Pending/in-flight downloads
    registry: DownloadRegistry,
    /// Finished events go out here
    events: EventBus<DownloadFinished>,
    sanitizer: Arc<FilenameSanitizer>,
    classifier: Arc<StoragePolicyClassifier>,
    layout: Arc<StorageLayout>,
    transfer_timeout: Duration,
    /// Control channel of every running transfer
    jobs: Arc<RwLock<HashMap<DownloadId, watch::Sender<TransferControl>>>>,
    /// Serializes final-name selection and the move into the downloads dir
    persist_lock: Arc<Mutex<()>>,
}

impl DownloadsManager {
    pub fn new(layout: StorageLayout, events: EventBus<DownloadFinished>) -> Self {
        Self {
            registry: DownloadRegistry::new(),
            events,
            sanitizer: Arc::new(FilenameSanitizer::new()),
            classifier: Arc::new(StoragePolicyClassifier::new()),
            layout: Arc::new(layout),
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            persist_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: FilenameSanitizer) -> Self {
        self.sanitizer = Arc::new(sanitizer);
        self
    }

    pub fn with_classifier(mut self, classifier: StoragePolicyClassifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Bound on how long a transfer may take before it counts as failed
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn registry(&self) -> &DownloadRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus<DownloadFinished> {
        &self.events
    }

    pub fn subscribe(&self) -> Subscription<DownloadFinished> {
        self.events.subscribe()
    }

    /// Build a pending download for `response`.
    ///
    /// Returns `None` when the response has no content type or the session
    /// cannot write to a file. Performs no I/O and registers nothing.
    pub fn setup_download(
        &self,
        response: &ResponseMetadata,
        session: Arc<dyn TransferSession>,
    ) -> Option<PendingDownload> {
        let Some(content_type) = response.usable_content_type() else {
            tracing::warn!(source = ?response.source, "Rejected response without content type");
            return None;
        };

        if !session.supports_file_destination() {
            tracing::warn!(source = ?response.source, "Rejected session without file destination");
            return None;
        }

        let filename = self.sanitizer.storage_name(&suggested_name(response));
        let policy = self.classifier.classify(content_type);
        let download = Download::new(
            filename,
            content_type.to_string(),
            policy,
            response.source.clone(),
            response.expected_size,
        );

        tracing::info!(
            download_id = %download.id(),
            filename = %download.filename(),
            content_type = %download.content_type(),
            temporary = download.is_temporary(),
            "Created new download"
        );

        Some(PendingDownload { download, session })
    }

    /// Register the download and hand it to its session.
    ///
    /// Returns immediately; the outcome arrives as a [`DownloadFinished`]
    /// event. Must be called from within a Tokio runtime.
    pub fn start_download(&self, pending: PendingDownload) -> Result<DownloadId> {
        let PendingDownload {
            mut download,
            session,
        } = pending;
        let id = download.id();

        download.begin(self.layout.working_path(id, download.filename()))?;
        self.registry.add(download.clone())?;

        let (tx, rx) = watch::channel(TransferControl::Continue);
        self.jobs.write().insert(id, tx);

        tracing::info!(
            download_id = %id,
            path = ?download.temporary_path(),
            "Started download"
        );

        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_transfer(download, session, rx).await;
        });

        Ok(id)
    }

    /// Cancel an in-flight download. It finishes as failed.
    ///
    /// Only a transfer still in progress can be cancelled; once the session
    /// has delivered the file the download is no longer cancellable and this
    /// returns [`DownloadError::NotFound`].
    pub fn cancel_download(&self, id: &DownloadId) -> Result<()> {
        let jobs = self.jobs.read();
        let control = jobs.get(id).ok_or(DownloadError::NotFound(*id))?;
        control.send_replace(TransferControl::Cancel);

        tracing::info!(download_id = %id, "Cancelling download");

        Ok(())
    }

    /// Get an in-flight download by ID
    pub fn get_download(&self, id: &DownloadId) -> Result<Download> {
        self.registry
            .find(id)
            .ok_or(DownloadError::NotFound(*id))
    }

    pub fn active_downloads(&self) -> Vec<Download> {
        self.registry.list()
    }

    pub fn download_count(&self) -> usize {
        self.registry.count()
    }

    async fn run_transfer(
        self,
        mut download: Download,
        session: Arc<dyn TransferSession>,
        control: watch::Receiver<TransferControl>,
    ) {
        let id = download.id();

        let transferred = self.transfer(&download, session.as_ref(), control).await;
        // Past this point the outcome no longer depends on the session
        self.jobs.write().remove(&id);

        let finalized = match transferred {
            Ok(location) => self.finalize_success(&mut download, location).await,
            Err(error) => {
                tracing::warn!(download_id = %id, error = %error, "Transfer failed");
                self.discard_partial(&download).await;
                download.fail(DownloadFailure::transfer(&error))
            }
        };

        if let Err(e) = finalized {
            tracing::error!(download_id = %id, error = %e, "Could not finalize download");
        }

        self.finish(download);
    }

    async fn transfer(
        &self,
        download: &Download,
        session: &dyn TransferSession,
        mut control: watch::Receiver<TransferControl>,
    ) -> Result<PathBuf> {
        let destination = self.layout.working_path(download.id(), download.filename());
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if *control.borrow_and_update() == TransferControl::Cancel {
            return Err(DownloadError::Cancelled);
        }

        let (completion, outcome) = Completion::channel();
        session.start(destination, completion);

        let waited = tokio::time::timeout(self.transfer_timeout, async {
            tokio::select! {
                outcome = outcome => outcome.unwrap_or_else(|_| {
                    Err(DownloadError::Transfer(
                        "session dropped its completion signal".to_string(),
                    ))
                }),
                _ = cancelled(&mut control) => Err(DownloadError::Cancelled),
            }
        })
        .await;

        match waited {
            Ok(Err(DownloadError::Cancelled)) => {
                session.cancel();
                Err(DownloadError::Cancelled)
            }
            Ok(outcome) => outcome,
            Err(_) => {
                session.cancel();
                Err(DownloadError::TimedOut(self.transfer_timeout))
            }
        }
    }

    async fn finalize_success(&self, download: &mut Download, location: PathBuf) -> Result<()> {
        download.set_temporary_path(location.clone());

        if download.is_temporary() {
            let sha256 = self.stored_sha256(download.id(), location).await;
            return download.complete(None, sha256);
        }

        let persisted = self
            .persist(&location, download.filename(), download.id())
            .await;
        match persisted {
            Ok(final_path) => {
                remove_dir_if_empty(&self.layout.working_dir(download.id())).await;
                let sha256 = self.stored_sha256(download.id(), final_path.clone()).await;
                download.complete(Some(final_path), sha256)
            }
            Err(error) => {
                tracing::warn!(download_id = %download.id(), error = %error, "Move failed");
                download.fail(DownloadFailure::moving(&error))
            }
        }
    }

    /// Move `source` into the downloads directory under a free name.
    async fn persist(&self, source: &Path, filename: &str, id: DownloadId) -> Result<PathBuf> {
        let _guard = self.persist_lock.lock().await;
        let downloads_dir = &self.layout.downloads_dir;

        tokio::fs::create_dir_all(downloads_dir)
            .await
            .map_err(|e| move_error(source, downloads_dir, e))?;

        let destination = unique_destination(downloads_dir, filename).await;
        match tokio::fs::rename(source, &destination).await {
            Ok(()) => Ok(destination),
            Err(e) if is_cross_device(&e) => {
                tracing::debug!(download_id = %id, "Rename crosses devices, copying");
                copy_across_devices(source, &destination, id).await
            }
            Err(e) => Err(move_error(source, &destination, e)),
        }
    }

    /// A file that cannot be hashed still completes, without a digest.
    async fn stored_sha256(&self, id: DownloadId, path: PathBuf) -> Option<String> {
        match file_sha256(path).await {
            Ok(hex) => Some(hex),
            Err(e) => {
                tracing::warn!(download_id = %id, error = %e, "Could not hash downloaded file");
                None
            }
        }
    }

    async fn discard_partial(&self, download: &Download) {
        if let Some(path) = download.temporary_path() {
            match tokio::fs::remove_file(path).await {
                Ok(()) => tracing::debug!(download_id = %download.id(), "Discarded partial file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(download_id = %download.id(), error = %e, "Could not discard partial file")
                }
            }
        }
        remove_dir_if_empty(&self.layout.working_dir(download.id())).await;
    }

    /// Leave the registry and notify subscribers. The registry removal is
    /// the guard: a download that is no longer registered is never
    /// published again.
    fn finish(&self, download: Download) {
        let id = download.id();
        if self.registry.remove(&id).is_none() {
            tracing::debug!(download_id = %id, "Ignoring repeated completion");
            return;
        }

        match download.state() {
            DownloadState::Completed => tracing::info!(
                download_id = %id,
                path = ?download.stored_path(),
                sha256 = ?download.sha256(),
                "Completed download"
            ),
            _ => tracing::warn!(
                download_id = %id,
                error = ?download.error().map(|e| &e.message),
                "Download failed"
            ),
        }

        self.events.publish(DownloadFinished { download });
    }
}

impl Clone for DownloadsManager {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            events: self.events.clone(),
            sanitizer: Arc::clone(&self.sanitizer),
            classifier: Arc::clone(&self.classifier),
            layout: Arc::clone(&self.layout),
            transfer_timeout: self.transfer_timeout,
            jobs: Arc::clone(&self.jobs),
            persist_lock: Arc::clone(&self.persist_lock),
        }
    }
}

fn suggested_name(response: &ResponseMetadata) -> String {
    if let Some(name) = response
        .suggested_filename
        .as_deref()
        .filter(|n| !n.trim().is_empty())
    {
        return name.to_string();
    }

    response
        .source
        .as_deref()
        .and_then(|s| url::Url::parse(s).ok())
        .and_then(|url| filename_from_url(&url))
        .unwrap_or_default()
}

async fn cancelled(control: &mut watch::Receiver<TransferControl>) {
    loop {
        if *control.borrow_and_update() == TransferControl::Cancel {
            return;
        }
        if control.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// `dir/name.ext`, else `dir/name 1.ext`, `dir/name 2.ext`, ...
async fn unique_destination(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !path_exists(&candidate).await {
        return candidate;
    }

    let (stem, extension) = split_extension(filename);
    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{stem} {n}{extension}"));
        if !path_exists(&candidate).await {
            return candidate;
        }
        n += 1;
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(index) if index > 0 => filename.split_at(index),
        _ => (filename, ""),
    }
}

async fn copy_across_devices(source: &Path, destination: &Path, id: DownloadId) -> Result<PathBuf> {
    let staging = destination
        .parent()
        .unwrap_or(destination)
        .join(format!(".{id}.part"));

    if let Err(e) = tokio::fs::copy(source, &staging).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(move_error(source, destination, e));
    }
    if let Err(e) = tokio::fs::rename(&staging, destination).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(move_error(source, destination, e));
    }
    if let Err(e) = tokio::fs::remove_file(source).await {
        tracing::warn!(download_id = %id, error = %e, "Could not remove working copy");
    }

    Ok(destination.to_path_buf())
}

fn move_error(from: &Path, to: &Path, source: io::Error) -> DownloadError {
    DownloadError::Move {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    }
}

#[cfg(any(unix, windows))]
fn is_cross_device(error: &io::Error) -> bool {
    error.raw_os_error() == Some(CROSS_DEVICE_ERROR)
}

#[cfg(not(any(unix, windows)))]
fn is_cross_device(_error: &io::Error) -> bool {
    false
}

async fn remove_dir_if_empty(dir: &Path) {
    // Fails harmlessly when the directory still holds a file
    let _ = tokio::fs::remove_dir(dir).await;
}

/// Hex SHA-256 of a stored file, read off the async workers.
async fn file_sha256(path: PathBuf) -> io::Result<String> {
    tokio::task::spawn_blocking(move || -> io::Result<String> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;

        let mut hex = String::with_capacity(64);
        for byte in hasher.finalize() {
            let _ = write!(hex, "{byte:02x}");
        }
        Ok(hex)
    })
    .await
    .map_err(io::Error::other)?
}
