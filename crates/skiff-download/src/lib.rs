//! skiff Download Manager
//!
//! Turns an inbound response into a tracked, classified, safely named file:
//! - Bidi-control stripping of untrusted filenames
//! - Temporary/permanent storage policy from the content type
//! - In-memory registry of in-flight downloads
//! - Atomic move into the persisted downloads directory
//! - Exactly one "download finished" event per download

mod download;
mod error;
mod events;
mod http;
mod manager;
mod policy;
mod registry;
mod sanitize;
mod session;

pub use download::{Download, DownloadFailure, DownloadId, DownloadState, FailureKind};
pub use error::DownloadError;
pub use events::{DownloadFinished, EventBus, Subscription};
pub use http::HttpTransferSession;
pub use manager::{DownloadsManager, PendingDownload, StorageLayout};
pub use policy::{StoragePolicy, StoragePolicyClassifier, TRANSIENT_CONTENT_TYPES};
pub use registry::DownloadRegistry;
pub use sanitize::{FilenameSanitizer, BIDI_CONTROL_CHARACTERS};
pub use session::{Completion, ResponseMetadata, TransferSession};

pub type Result<T> = std::result::Result<T, DownloadError>;
