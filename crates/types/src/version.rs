use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::manifest::ExtensionManifest;

/// A published release of an extension, as offered by a catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionVersion {
    pub version: String,
    pub release_date: DateTime<Utc>,
    #[serde(default)]
    pub changelog: String,
    /// Marks a release whose API surface breaks earlier consumers.
    #[serde(default)]
    pub breaking: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_host_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_host_version: Option<String>,
}

impl ExtensionVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            release_date: Utc::now(),
            changelog: String::new(),
            breaking: false,
            min_host_version: None,
            max_host_version: None,
        }
    }

    pub fn with_host_range(mut self, min: Option<&str>, max: Option<&str>) -> Self {
        self.min_host_version = min.map(str::to_string);
        self.max_host_version = max.map(str::to_string);
        self
    }
}

impl From<&ExtensionManifest> for ExtensionVersion {
    fn from(manifest: &ExtensionManifest) -> Self {
        ExtensionVersion::new(manifest.version.clone()).with_host_range(
            manifest.min_host_version.as_deref(),
            manifest.max_host_version.as_deref(),
        )
    }
}
