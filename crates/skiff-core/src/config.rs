//! Download manager configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use skiff_download::{FilenameSanitizer, StorageLayout, StoragePolicyClassifier};

use crate::error::CoreError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Working directory for in-flight and temporary downloads
    pub temp_dir: PathBuf,
    /// Persisted downloads directory
    pub downloads_dir: PathBuf,
    /// Upper bound on a single transfer
    pub transfer_timeout_secs: u64,
    /// Added to the built-in set of temporary content types
    pub transient_content_types: Vec<String>,
    /// Replaces the bidi-control denylist when non-empty
    pub stripped_characters: Vec<char>,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        let downloads_dir = dirs::download_dir().unwrap_or_else(|| data_dir.join("Downloads"));

        Self {
            temp_dir: std::env::temp_dir().join("skiff").join("downloads"),
            downloads_dir,
            transfer_timeout_secs: 600,
            transient_content_types: Vec::new(),
            stripped_characters: Vec::new(),
        }
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("skiff"))
            .unwrap_or_else(|| PathBuf::from(".skiff"))
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.transfer_timeout_secs == 0 {
            return Err(CoreError::Config(
                "transfer_timeout_secs must be positive".to_string(),
            ));
        }
        if self.temp_dir == self.downloads_dir {
            return Err(CoreError::Config(
                "temp_dir and downloads_dir must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(self.temp_dir.clone(), self.downloads_dir.clone())
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    pub fn sanitizer(&self) -> FilenameSanitizer {
        if self.stripped_characters.is_empty() {
            FilenameSanitizer::new()
        } else {
            FilenameSanitizer::with_denylist(self.stripped_characters.iter().copied())
        }
    }

    pub fn classifier(&self) -> StoragePolicyClassifier {
        let mut classifier = StoragePolicyClassifier::new();
        classifier.extend(&self.transient_content_types);
        classifier
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}
