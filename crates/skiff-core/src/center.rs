//! Download center
//!
//! Central container: one configured manager, its event bus and the HTTP
//! client used for URL downloads.

use std::sync::Arc;

use skiff_download::{
    Download, DownloadError, DownloadFinished, DownloadId, DownloadsManager, EventBus,
    HttpTransferSession, ResponseMetadata, Subscription, TransferSession,
};

use crate::config::Config;
use crate::error::CoreError;
use crate::Result;

pub struct DownloadCenter {
    /// Configuration
    config: Config,
    /// Downloads manager (owns registry and event bus)
    manager: DownloadsManager,
    /// Shared HTTP client for URL downloads
    client: reqwest::Client,
}

impl DownloadCenter {
    /// Build the manager described by `config` and create its directories.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        std::fs::create_dir_all(&config.temp_dir)?;
        std::fs::create_dir_all(&config.downloads_dir)?;

        let events = EventBus::new();
        let manager = DownloadsManager::new(config.layout(), events)
            .with_sanitizer(config.sanitizer())
            .with_classifier(config.classifier())
            .with_transfer_timeout(config.transfer_timeout());

        let client = reqwest::Client::builder()
            .user_agent(concat!("skiff/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(DownloadError::from)?;

        tracing::info!(
            temp_dir = %config.temp_dir.display(),
            downloads_dir = %config.downloads_dir.display(),
            "Download center ready"
        );

        Ok(Self {
            config,
            manager,
            client,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manager(&self) -> &DownloadsManager {
        &self.manager
    }

    pub fn subscribe(&self) -> Subscription<DownloadFinished> {
        self.manager.subscribe()
    }

    /// Set up and start a download for an already received response.
    pub fn start(
        &self,
        response: &ResponseMetadata,
        session: Arc<dyn TransferSession>,
    ) -> Result<DownloadId> {
        let pending = self
            .manager
            .setup_download(response, session)
            .ok_or_else(|| {
                CoreError::Unsupported(
                    response
                        .source
                        .clone()
                        .unwrap_or_else(|| "response".to_string()),
                )
            })?;

        Ok(self.manager.start_download(pending)?)
    }

    /// Fetch `url` and start downloading its body.
    pub async fn download_url(&self, url: &str) -> Result<DownloadId> {
        let (metadata, session) = HttpTransferSession::fetch(&self.client, url).await?;
        self.start(&metadata, Arc::new(session))
    }

    /// Download `url` and wait until it reaches a terminal state.
    pub async fn download_url_and_wait(&self, url: &str) -> Result<Download> {
        let mut events = self.subscribe();
        let id = self.download_url(url).await?;

        events
            .finished(id)
            .await
            .ok_or(CoreError::Download(DownloadError::NotFound(id)))
    }
}
