//! Transfer session contract
//!
//! The manager never touches response bytes. A [`TransferSession`] writes
//! them to the path it is given and reports the outcome through a
//! [`Completion`], which is consumed on use and can therefore fire at most
//! once.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::oneshot;

use crate::error::DownloadError;
use crate::Result;

/// Metadata of the response being downloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub content_type: Option<String>,
    /// Untrusted name suggested by the server
    pub suggested_filename: Option<String>,
    /// Where the response came from, usually a URL
    pub source: Option<String>,
    pub expected_size: Option<u64>,
}

impl ResponseMetadata {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..Self::default()
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.suggested_filename = Some(filename.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    /// Non-blank content type, if any
    pub fn usable_content_type(&self) -> Option<&str> {
        self.content_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Single-shot completion signal handed to [`TransferSession::start`].
#[derive(Debug)]
pub struct Completion {
    sender: oneshot::Sender<Result<PathBuf>>,
}

impl Completion {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Result<PathBuf>>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, receiver)
    }

    /// The bytes are complete at `location`.
    pub fn succeed(self, location: PathBuf) {
        self.finish(Ok(location));
    }

    pub fn fail(self, error: DownloadError) {
        self.finish(Err(error));
    }

    pub fn finish(self, outcome: Result<PathBuf>) {
        if self.sender.send(outcome).is_err() {
            tracing::debug!("Completion delivered after the download was finalized");
        }
    }
}

/// Performs the byte transfer for one response.
///
/// Dropping the [`Completion`] without calling it counts as a transfer
/// failure.
pub trait TransferSession: Send + Sync {
    /// Begin writing bytes to `destination`. Must return without waiting
    /// for the transfer to finish.
    fn start(&self, destination: PathBuf, completion: Completion);

    /// Abort an ongoing transfer. The completion may still fire afterwards.
    fn cancel(&self) {}

    /// Whether this session can write to a file destination at all
    fn supports_file_destination(&self) -> bool {
        true
    }
}
