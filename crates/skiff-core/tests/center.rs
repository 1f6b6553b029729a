//! Download center wiring tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use skiff_core::{
    Completion, Config, CoreError, DownloadCenter, DownloadState, ResponseMetadata,
    TransferSession,
};
use tempfile::TempDir;

/// Writes a fixed body immediately.
struct InstantSession;

impl TransferSession for InstantSession {
    fn start(&self, destination: PathBuf, completion: Completion) {
        match std::fs::write(&destination, b"instant") {
            Ok(()) => completion.succeed(destination),
            Err(e) => completion.fail(e.into()),
        }
    }
}

fn config(root: &TempDir) -> Config {
    let mut config = Config::new(root.path().to_path_buf());
    config.temp_dir = root.path().join("work");
    config.downloads_dir = root.path().join("Downloads");
    config
}

#[tokio::test]
async fn test_new_creates_directories() {
    let root = TempDir::new().unwrap();
    let center = DownloadCenter::new(config(&root)).unwrap();

    assert!(center.config().temp_dir.is_dir());
    assert!(center.config().downloads_dir.is_dir());
    assert_eq!(center.manager().download_count(), 0);
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let root = TempDir::new().unwrap();
    let mut config = config(&root);
    config.transfer_timeout_secs = 0;

    assert!(matches!(
        DownloadCenter::new(config),
        Err(CoreError::Config(_))
    ));
}

#[tokio::test]
async fn test_configured_content_type_stays_temporary() {
    let root = TempDir::new().unwrap();
    let mut config = config(&root);
    config.transient_content_types = vec!["text/calendar".to_string()];
    let center = DownloadCenter::new(config).unwrap();

    let mut events = center.subscribe();
    let response = ResponseMetadata::new("text/calendar").with_filename("meeting.ics");
    let id = center.start(&response, Arc::new(InstantSession)).unwrap();

    let download = tokio::time::timeout(Duration::from_secs(5), events.finished(id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(download.state(), DownloadState::Completed);
    assert!(download.is_temporary());
    assert!(download.temporary_path().unwrap().exists());
    assert!(!center.config().downloads_dir.join("meeting.ics").exists());
}

#[tokio::test]
async fn test_start_rejects_unusable_response() {
    let root = TempDir::new().unwrap();
    let center = DownloadCenter::new(config(&root)).unwrap();

    let response = ResponseMetadata::default().with_source("https://example.com/x");
    let result = center.start(&response, Arc::new(InstantSession));
    assert!(matches!(result, Err(CoreError::Unsupported(source)) if source.contains("example.com")));
}

#[tokio::test]
async fn test_download_url_rejects_invalid_url() {
    let root = TempDir::new().unwrap();
    let center = DownloadCenter::new(config(&root)).unwrap();

    assert!(matches!(
        center.download_url("::not a url::").await,
        Err(CoreError::Download(skiff_core::DownloadError::InvalidUrl(_)))
    ));
}
