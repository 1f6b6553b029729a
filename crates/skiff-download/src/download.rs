//! Download data structure and lifecycle state machine
//!
//! ```text
//! Pending
//!   ↓ start_download
//! InFlight
//!   ↓ completion signal (exactly once)
//! Completed | Failed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::DownloadError;
use crate::policy::StoragePolicy;
use crate::Result;

/// Identity of a single transfer. Allocated once and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(Uuid);

impl DownloadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DownloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DownloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DownloadId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    /// Constructed, not yet registered
    Pending,
    /// Registered, bytes being written to the temp path
    InFlight,
    /// File stored at its final location
    Completed,
    /// Transfer, move or cancellation failure
    Failed,
}

impl DownloadState {
    /// Check if transition to another state is valid
    pub fn can_transition_to(&self, target: DownloadState) -> bool {
        matches!(
            (self, target),
            (DownloadState::Pending, DownloadState::InFlight)
                | (DownloadState::InFlight, DownloadState::Completed)
                | (DownloadState::InFlight, DownloadState::Failed)
        )
    }

    /// Completed and failed downloads never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadState::Completed | DownloadState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadState::Pending => "pending",
            DownloadState::InFlight => "in_flight",
            DownloadState::Completed => "completed",
            DownloadState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DownloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DownloadState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(DownloadState::Pending),
            "in_flight" | "inflight" => Ok(DownloadState::InFlight),
            "completed" => Ok(DownloadState::Completed),
            "failed" => Ok(DownloadState::Failed),
            _ => Err(format!("Unknown download state: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transfer,
    Move,
    Cancelled,
    TimedOut,
}

/// Terminal error carried by a failed download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl DownloadFailure {
    /// Failure reported by the transfer itself. Move errors go through
    /// [`DownloadFailure::moving`] so they stay distinguishable.
    pub fn transfer(error: &DownloadError) -> Self {
        let kind = match error {
            DownloadError::Cancelled => FailureKind::Cancelled,
            DownloadError::TimedOut(_) => FailureKind::TimedOut,
            _ => FailureKind::Transfer,
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }

    pub fn moving(error: &DownloadError) -> Self {
        Self {
            kind: FailureKind::Move,
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for DownloadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Download {
    id: DownloadId,
    filename: String,
    content_type: String,
    temporary: bool,
    state: DownloadState,
    source: Option<String>,
    expected_size: Option<u64>,
    temporary_path: Option<PathBuf>,
    final_path: Option<PathBuf>,
    error: Option<DownloadFailure>,
    sha256: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl Download {
    /// `filename` must already be the sanitized storage name.
    pub(crate) fn new(
        filename: String,
        content_type: String,
        policy: StoragePolicy,
        source: Option<String>,
        expected_size: Option<u64>,
    ) -> Self {
        Self {
            id: DownloadId::new(),
            filename,
            content_type,
            temporary: policy.is_temporary(),
            state: DownloadState::Pending,
            source,
            expected_size,
            temporary_path: None,
            final_path: None,
            error: None,
            sha256: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn id(&self) -> DownloadId {
        self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Storage policy, fixed at construction
    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    pub fn policy(&self) -> StoragePolicy {
        if self.temporary {
            StoragePolicy::Temporary
        } else {
            StoragePolicy::Permanent
        }
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn expected_size(&self) -> Option<u64> {
        self.expected_size
    }

    pub fn temporary_path(&self) -> Option<&Path> {
        self.temporary_path.as_deref()
    }

    /// Set only for permanent downloads after a successful move
    pub fn final_path(&self) -> Option<&Path> {
        self.final_path.as_deref()
    }

    pub fn error(&self) -> Option<&DownloadFailure> {
        self.error.as_ref()
    }

    pub fn sha256(&self) -> Option<&str> {
        self.sha256.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Where the file can be found once the download completed
    pub fn stored_path(&self) -> Option<&Path> {
        match self.state {
            DownloadState::Completed => self.final_path().or(self.temporary_path()),
            _ => None,
        }
    }

    fn transition(&mut self, target: DownloadState) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(DownloadError::InvalidState {
                id: self.id,
                state: self.state,
                expected: match target {
                    DownloadState::InFlight => DownloadState::Pending,
                    _ => DownloadState::InFlight,
                },
            });
        }
        self.state = target;
        Ok(())
    }

    pub(crate) fn begin(&mut self, temporary_path: PathBuf) -> Result<()> {
        self.transition(DownloadState::InFlight)?;
        self.temporary_path = Some(temporary_path);
        Ok(())
    }

    /// Records where the session actually left the bytes.
    pub(crate) fn set_temporary_path(&mut self, path: PathBuf) {
        self.temporary_path = Some(path);
    }

    pub(crate) fn complete(
        &mut self,
        final_path: Option<PathBuf>,
        sha256: Option<String>,
    ) -> Result<()> {
        self.transition(DownloadState::Completed)?;
        self.final_path = final_path;
        self.sha256 = sha256;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn fail(&mut self, failure: DownloadFailure) -> Result<()> {
        self.transition(DownloadState::Failed)?;
        self.error = Some(failure);
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn download(policy: StoragePolicy) -> Download {
        Download::new(
            "file.bin".to_string(),
            "application/octet-stream".to_string(),
            policy,
            Some("https://example.com/file.bin".to_string()),
            Some(42),
        )
    }

    #[test]
    fn test_new_download() {
        let download = download(StoragePolicy::Permanent);

        assert_eq!(download.state(), DownloadState::Pending);
        assert!(!download.is_temporary());
        assert!(download.temporary_path().is_none());
        assert!(download.final_path().is_none());
        assert!(download.error().is_none());
        assert!(download.completed_at().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = download(StoragePolicy::Temporary);
        let b = download(StoragePolicy::Temporary);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_valid_transitions() {
        assert!(DownloadState::Pending.can_transition_to(DownloadState::InFlight));
        assert!(DownloadState::InFlight.can_transition_to(DownloadState::Completed));
        assert!(DownloadState::InFlight.can_transition_to(DownloadState::Failed));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!DownloadState::Pending.can_transition_to(DownloadState::Completed));
        assert!(!DownloadState::Completed.can_transition_to(DownloadState::Failed));
        assert!(!DownloadState::Failed.can_transition_to(DownloadState::InFlight));
        assert!(!DownloadState::InFlight.can_transition_to(DownloadState::InFlight));
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut download = download(StoragePolicy::Permanent);
        download.begin(PathBuf::from("/tmp/x/file.bin")).unwrap();
        download
            .complete(Some(PathBuf::from("/downloads/file.bin")), None)
            .unwrap();

        let err = download
            .fail(DownloadFailure::transfer(&DownloadError::Cancelled))
            .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidState { .. }));
        assert_eq!(download.state(), DownloadState::Completed);
        assert!(download.error().is_none());
    }

    #[test]
    fn test_stored_path() {
        let mut temporary = download(StoragePolicy::Temporary);
        temporary.begin(PathBuf::from("/tmp/x/pass.pkpass")).unwrap();
        assert!(temporary.stored_path().is_none());
        temporary.complete(None, None).unwrap();
        assert_eq!(
            temporary.stored_path(),
            Some(Path::new("/tmp/x/pass.pkpass"))
        );
    }

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            DownloadFailure::transfer(&DownloadError::Cancelled).kind,
            FailureKind::Cancelled
        );
        assert_eq!(
            DownloadFailure::transfer(&DownloadError::Transfer("reset".into())).kind,
            FailureKind::Transfer
        );
        assert_eq!(
            DownloadFailure::moving(&DownloadError::Transfer("x".into())).kind,
            FailureKind::Move
        );
    }
}
