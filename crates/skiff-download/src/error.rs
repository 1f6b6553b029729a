//! Download error types

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::download::{DownloadId, DownloadState};

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Download not found: {0}")]
    NotFound(DownloadId),

    #[error("Download already registered: {0}")]
    AlreadyRegistered(DownloadId),

    #[error("Download {id} is {state}, expected {expected}")]
    InvalidState {
        id: DownloadId,
        state: DownloadState,
        expected: DownloadState,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Failed to move {} to {}: {source}", .from.display(), .to.display())]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Download cancelled")]
    Cancelled,

    #[error("Transfer timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}
