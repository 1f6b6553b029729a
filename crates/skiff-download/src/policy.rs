//! Storage policy classification
//!
//! Content types the platform opens in place (passes, AR/3D scenes) stay in
//! the temp directory; everything else is moved to the downloads directory.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Content types previewed in place without a persisted copy
pub const TRANSIENT_CONTENT_TYPES: &[&str] = &[
    // Wallet passes
    "application/vnd.apple.pkpass",
    "application/vnd.apple.pkpasses",
    // AR Quick Look scenes
    "model/vnd.usdz+zip",
    "model/vnd.reality",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoragePolicy {
    /// Left at the temp path for a viewer to open
    Temporary,
    /// Moved atomically to the downloads directory
    Permanent,
}

impl StoragePolicy {
    pub fn is_temporary(&self) -> bool {
        matches!(self, StoragePolicy::Temporary)
    }
}

#[derive(Debug, Clone)]
pub struct StoragePolicyClassifier {
    transient: HashSet<String>,
}

impl StoragePolicyClassifier {
    pub fn new() -> Self {
        Self::with_content_types(TRANSIENT_CONTENT_TYPES.iter().copied())
    }

    /// Classifier whose temporary set is exactly `content_types`
    pub fn with_content_types<I, S>(content_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut classifier = Self {
            transient: HashSet::new(),
        };
        classifier.extend(content_types);
        classifier
    }

    pub fn extend<I, S>(&mut self, content_types: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.transient.extend(
            content_types
                .into_iter()
                .map(|t| normalize(t.as_ref()))
                .filter(|t| !t.is_empty()),
        );
    }

    pub fn transient_count(&self) -> usize {
        self.transient.len()
    }

    /// Total: every content type maps to exactly one policy.
    pub fn classify(&self, content_type: &str) -> StoragePolicy {
        if self.transient.contains(&normalize(content_type)) {
            StoragePolicy::Temporary
        } else {
            StoragePolicy::Permanent
        }
    }
}

impl Default for StoragePolicyClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// `Model/VND.Reality; charset=binary` -> `model/vnd.reality`
fn normalize(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase()
}
