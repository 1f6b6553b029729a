//! skiff Core
//!
//! Builds a downloads manager from configuration and owns the shared
//! HTTP client and event bus.

mod center;
mod config;
mod error;

pub use center::DownloadCenter;
pub use config::Config;
pub use error::CoreError;

// Re-export download components
pub use skiff_download::{
    Completion, Download, DownloadError, DownloadFailure, DownloadFinished, DownloadId,
    DownloadState, DownloadsManager, EventBus, FailureKind, FilenameSanitizer,
    HttpTransferSession, PendingDownload, ResponseMetadata, StorageLayout, StoragePolicy,
    StoragePolicyClassifier, Subscription, TransferSession,
};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
