//! In-flight download registry

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::download::{Download, DownloadId};
use crate::error::DownloadError;
use crate::Result;

/// Authoritative set of pending/in-flight downloads.
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct DownloadRegistry {
    downloads: Arc<RwLock<HashMap<DownloadId, Download>>>,
}

impl DownloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a download. An id can only be registered once.
    pub fn add(&self, download: Download) -> Result<()> {
        let mut downloads = self.downloads.write();
        if downloads.contains_key(&download.id()) {
            return Err(DownloadError::AlreadyRegistered(download.id()));
        }
        downloads.insert(download.id(), download);
        Ok(())
    }

    /// Remove a download, returning it if it was registered.
    /// Removing an absent id is a no-op.
    pub fn remove(&self, id: &DownloadId) -> Option<Download> {
        self.downloads.write().remove(id)
    }

    pub fn count(&self) -> usize {
        self.downloads.read().len()
    }

    pub fn find(&self, id: &DownloadId) -> Option<Download> {
        self.downloads.read().get(id).cloned()
    }

    pub fn contains(&self, id: &DownloadId) -> bool {
        self.downloads.read().contains_key(id)
    }

    pub fn list(&self) -> Vec<Download> {
        self.downloads.read().values().cloned().collect()
    }
}
