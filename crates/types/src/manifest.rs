use std::collections::BTreeSet;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::capability::{Capability, UiSlot};
use crate::integrity::Integrity;

const MAX_ID_LEN: usize = 64;
const MAX_NAME_LEN: usize = 128;
const MAX_ICON_LEN: usize = 8;
const MAX_DESCRIPTION_LEN: usize = 512;

/// Execution flavour of an extension, which decides the payload file and the
/// kind of sandbox context the host prepares for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionKind {
    /// Renders into a restricted document context.
    Interactive,
    /// Runs headless in a restricted script context.
    Background,
}

impl ExtensionKind {
    /// Name of the single payload file a bundle of this kind carries.
    pub fn payload_file(self) -> &'static str {
        match self {
            ExtensionKind::Interactive => "index.html",
            ExtensionKind::Background => "index.js",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExtensionKind::Interactive => "interactive",
            ExtensionKind::Background => "background",
        }
    }
}

impl std::fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandContribution {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewContribution {
    pub id: String,
    pub slot: UiSlot,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributions {
    #[serde(default)]
    pub commands: Vec<CommandContribution>,
    #[serde(default)]
    pub views: Vec<ViewContribution>,
}

/// Immutable descriptor published alongside an extension payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    /// Globally unique identity, stable across versions.
    pub id: String,
    pub name: String,
    /// Semantic version of this release.
    pub version: String,
    pub kind: ExtensionKind,
    /// Declared capabilities. Advisory: shown to the user, never a bypass of
    /// runtime permission checks.
    #[serde(default)]
    pub permissions: Vec<Capability>,
    pub icon: String,
    #[serde(default)]
    pub contributes: Contributions,
    /// Digest of the payload file.
    pub integrity: Integrity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_host_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_host_version: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub activation_events: Vec<String>,
}

impl ExtensionManifest {
    /// Parse and validate a `manifest.json` document.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ManifestError> {
        let manifest: ExtensionManifest =
            serde_json::from_slice(bytes).map_err(|e| ManifestError::Malformed(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parsed semantic version. Only meaningful after [`validate`](Self::validate).
    pub fn semver(&self) -> Result<Version, ManifestError> {
        Version::parse(self.version.trim())
            .map_err(|_| ManifestError::InvalidVersion(self.version.clone()))
    }

    /// Checks the declaration-level invariants of the manifest.
    pub fn validate(&self) -> Result<(), ManifestError> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(ManifestError::EmptyId);
        }
        if !is_valid_extension_id(id) || id.len() != self.id.len() {
            return Err(ManifestError::InvalidId(self.id.clone()));
        }

        let name_len = self.name.trim().chars().count();
        if name_len == 0 || name_len > MAX_NAME_LEN {
            return Err(ManifestError::InvalidName(self.name.clone()));
        }

        self.semver()?;

        let icon_len = self.icon.chars().count();
        if icon_len == 0 || icon_len > MAX_ICON_LEN {
            return Err(ManifestError::InvalidIcon(self.icon.clone()));
        }

        if self.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(ManifestError::DescriptionTooLong);
        }

        let mut declared = BTreeSet::new();
        for permission in &self.permissions {
            if !declared.insert(*permission) {
                return Err(ManifestError::DuplicatePermission(*permission));
            }
        }

        let mut command_ids = BTreeSet::new();
        for command in &self.contributes.commands {
            if command.id.trim().is_empty() {
                return Err(ManifestError::EmptyContributionId("command"));
            }
            if !command_ids.insert(command.id.as_str()) {
                return Err(ManifestError::DuplicateContribution(command.id.clone()));
            }
        }

        let mut view_ids = BTreeSet::new();
        for view in &self.contributes.views {
            if view.id.trim().is_empty() {
                return Err(ManifestError::EmptyContributionId("view"));
            }
            if !view_ids.insert(view.id.as_str()) {
                return Err(ManifestError::DuplicateContribution(view.id.clone()));
            }
        }

        let min = parse_bound(self.min_host_version.as_deref())?;
        let max = parse_bound(self.max_host_version.as_deref())?;
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                return Err(ManifestError::InvertedHostBounds {
                    min: min.to_string(),
                    max: max.to_string(),
                });
            }
        }

        Ok(())
    }
}

fn parse_bound(value: Option<&str>) -> Result<Option<Version>, ManifestError> {
    match value {
        None => Ok(None),
        Some(raw) => Version::parse(raw.trim())
            .map(Some)
            .map_err(|_| ManifestError::InvalidHostBound(raw.to_string())),
    }
}

/// Lowercase ascii letters, digits and single hyphens, no leading or trailing hyphen.
fn is_valid_extension_id(value: &str) -> bool {
    if value.len() > MAX_ID_LEN || value.starts_with('-') || value.ends_with('-') {
        return false;
    }
    value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest is not valid JSON: {0}")]
    Malformed(String),

    #[error("manifest id must not be empty")]
    EmptyId,

    #[error("manifest id is invalid: {0}")]
    InvalidId(String),

    #[error("manifest name is invalid: {0:?}")]
    InvalidName(String),

    #[error("manifest version is not a semantic version: {0}")]
    InvalidVersion(String),

    #[error("manifest icon must be 1 to 8 characters: {0:?}")]
    InvalidIcon(String),

    #[error("manifest description exceeds 512 characters")]
    DescriptionTooLong,

    #[error("manifest permission is duplicated: {0}")]
    DuplicatePermission(Capability),

    #[error("manifest {0} contribution has an empty id")]
    EmptyContributionId(&'static str),

    #[error("manifest contribution id is duplicated: {0}")]
    DuplicateContribution(String),

    #[error("manifest host version bound is not a semantic version: {0}")]
    InvalidHostBound(String),

    #[error("minHostVersion {min} is greater than maxHostVersion {max}")]
    InvertedHostBounds { min: String, max: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_manifest() -> ExtensionManifest {
        ExtensionManifest {
            id: "lab-monitor".to_string(),
            name: "Lab Monitor".to_string(),
            version: "1.2.0".to_string(),
            kind: ExtensionKind::Background,
            permissions: vec![Capability::CommandsRegister, Capability::UiNotifications],
            icon: "🧪".to_string(),
            contributes: Contributions {
                commands: vec![CommandContribution {
                    id: "lab-monitor.refresh".to_string(),
                    title: "Refresh".to_string(),
                }],
                views: vec![],
            },
            integrity: Integrity::sha256(b"payload"),
            min_host_version: Some("1.0.0".to_string()),
            max_host_version: None,
            description: String::new(),
            author: "Lab".to_string(),
            activation_events: vec![],
        }
    }

    #[test]
    fn validates_baseline_manifest() {
        assert_eq!(valid_manifest().validate(), Ok(()));
    }

    #[test]
    fn rejects_invalid_id_format() {
        for id in ["Lab Monitor", "-lab", "lab-", "lab_monitor", "lab.monitor"] {
            let mut manifest = valid_manifest();
            manifest.id = id.to_string();
            assert!(
                matches!(manifest.validate(), Err(ManifestError::InvalidId(_))),
                "{id} should be rejected"
            );
        }

        let mut manifest = valid_manifest();
        manifest.id = "a".repeat(65);
        assert!(matches!(manifest.validate(), Err(ManifestError::InvalidId(_))));
    }

    #[test]
    fn rejects_empty_id() {
        let mut manifest = valid_manifest();
        manifest.id = "  ".to_string();
        assert_eq!(manifest.validate(), Err(ManifestError::EmptyId));
    }

    #[test]
    fn rejects_non_semver_version() {
        let mut manifest = valid_manifest();
        manifest.version = "v1".to_string();
        assert_eq!(
            manifest.validate(),
            Err(ManifestError::InvalidVersion("v1".to_string()))
        );
    }

    #[test]
    fn rejects_oversized_icon() {
        let mut manifest = valid_manifest();
        manifest.icon = "too-long-icon".to_string();
        assert!(matches!(manifest.validate(), Err(ManifestError::InvalidIcon(_))));
    }

    #[test]
    fn rejects_duplicate_contributions_and_permissions() {
        let mut manifest = valid_manifest();
        manifest
            .contributes
            .commands
            .push(manifest.contributes.commands[0].clone());
        assert_eq!(
            manifest.validate(),
            Err(ManifestError::DuplicateContribution(
                "lab-monitor.refresh".to_string()
            ))
        );

        let mut manifest = valid_manifest();
        manifest.permissions.push(Capability::CommandsRegister);
        assert_eq!(
            manifest.validate(),
            Err(ManifestError::DuplicatePermission(Capability::CommandsRegister))
        );
    }

    #[test]
    fn rejects_inverted_or_invalid_host_bounds() {
        let mut manifest = valid_manifest();
        manifest.min_host_version = Some("3.0.0".to_string());
        manifest.max_host_version = Some("2.0.0".to_string());
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::InvertedHostBounds { .. })
        ));

        let mut manifest = valid_manifest();
        manifest.max_host_version = Some("latest".to_string());
        assert_eq!(
            manifest.validate(),
            Err(ManifestError::InvalidHostBound("latest".to_string()))
        );
    }

    #[test]
    fn parses_manifest_json_with_defaults() {
        let json = format!(
            r#"{{
                "id": "patients",
                "name": "Patients",
                "version": "0.3.1",
                "kind": "interactive",
                "icon": "P",
                "permissions": ["ui.sidebar", "network.http"],
                "contributes": {{ "commands": [{{ "id": "patients.open", "title": "Open" }}] }},
                "integrity": "{}",
                "minHostVersion": "2.0.0"
            }}"#,
            Integrity::sha256(b"<html></html>")
        );

        let manifest = ExtensionManifest::from_json(json.as_bytes()).unwrap();
        assert_eq!(manifest.kind, ExtensionKind::Interactive);
        assert_eq!(manifest.kind.payload_file(), "index.html");
        assert_eq!(
            manifest.permissions,
            vec![Capability::UiSidebar, Capability::NetworkHttp]
        );
        assert_eq!(manifest.min_host_version.as_deref(), Some("2.0.0"));
        assert!(manifest.contributes.views.is_empty());
        assert!(manifest.activation_events.is_empty());
    }

    #[test]
    fn malformed_json_and_unknown_capabilities_are_invalid() {
        assert!(matches!(
            ExtensionManifest::from_json(b"{ not json"),
            Err(ManifestError::Malformed(_))
        ));

        let json = br#"{"id":"x","name":"X","version":"1.0.0","kind":"background","icon":"x",
            "permissions":["root.shell"],"integrity":"sha256-47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="}"#;
        assert!(matches!(
            ExtensionManifest::from_json(json),
            Err(ManifestError::Malformed(_))
        ));
    }
}
