use std::collections::BTreeMap;
use std::sync::Arc;

use semver::Version;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use warden_storage::{StoragePort, StorageScope};
use warden_types::{ExtensionManifest, ExtensionVersion};

use crate::HOST_OWNER;
use crate::error::{Result, StoreError};

const INSTALLED_VERSIONS_KEY: &str = "installed-versions";

/// Outcome of checking a release against the running host version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compatibility {
    pub compatible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Compatibility {
    fn ok() -> Self {
        Self {
            compatible: true,
            reason: None,
        }
    }

    fn rejected(reason: String) -> Self {
        Self {
            compatible: false,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCheck {
    pub can_update: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

struct Inner {
    host_version: Version,
    storage: Arc<dyn StoragePort>,
    installed: RwLock<BTreeMap<String, String>>,
    commit_lock: Mutex<()>,
}

/// Tracks installed extension versions and decides which releases may be
/// installed on this host.
#[derive(Clone)]
pub struct VersionManager {
    inner: Arc<Inner>,
}

impl VersionManager {
    /// Load the installed version record. Missing or corrupt data starts empty.
    pub async fn load(storage: Arc<dyn StoragePort>, host_version: Version) -> Self {
        let installed = match storage
            .get(HOST_OWNER, StorageScope::Host, INSTALLED_VERSIONS_KEY)
            .await
        {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(error = %e, "Installed version record is corrupt, starting empty");
                BTreeMap::new()
            }),
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read installed version record, starting empty");
                BTreeMap::new()
            }
        };

        debug!(%host_version, installed = installed.len(), "Loaded version manager");

        Self {
            inner: Arc::new(Inner {
                host_version,
                storage,
                installed: RwLock::new(installed),
                commit_lock: Mutex::new(()),
            }),
        }
    }

    pub fn host_version(&self) -> &Version {
        &self.inner.host_version
    }

    /// Check a release's host bounds against the running host version.
    pub fn is_compatible(&self, version: &ExtensionVersion) -> Compatibility {
        let host = &self.inner.host_version;

        if let Some(min) = version.min_host_version.as_deref() {
            match Version::parse(min.trim()) {
                Ok(min) if *host < min => {
                    return Compatibility::rejected(format!(
                        "Requires host version {min} or higher"
                    ));
                }
                Ok(_) => {}
                Err(_) => {
                    return Compatibility::rejected(format!(
                        "Invalid minimum host version {min}"
                    ));
                }
            }
        }

        if let Some(max) = version.max_host_version.as_deref() {
            match Version::parse(max.trim()) {
                Ok(max) if *host > max => {
                    return Compatibility::rejected(format!(
                        "Not compatible with host version {host}, supports up to {max}"
                    ));
                }
                Ok(_) => {}
                Err(_) => {
                    return Compatibility::rejected(format!(
                        "Invalid maximum host version {max}"
                    ));
                }
            }
        }

        Compatibility::ok()
    }

    pub fn is_manifest_compatible(&self, manifest: &ExtensionManifest) -> Compatibility {
        self.is_compatible(&ExtensionVersion::from(manifest))
    }

    /// A version may be installed over the current one only when it is valid
    /// semver and strictly newer, or when nothing is installed yet.
    pub async fn can_update(&self, extension_id: &str, new_version: &str) -> UpdateCheck {
        let Ok(candidate) = Version::parse(new_version.trim()) else {
            return UpdateCheck {
                can_update: false,
                reason: Some(format!("Invalid version {new_version}")),
            };
        };

        let Some(installed) = self.installed_semver(extension_id).await else {
            return UpdateCheck {
                can_update: true,
                reason: None,
            };
        };

        if candidate > installed {
            UpdateCheck {
                can_update: true,
                reason: None,
            }
        } else {
            UpdateCheck {
                can_update: false,
                reason: Some(format!(
                    "Version {candidate} is not newer than installed version {installed}"
                )),
            }
        }
    }

    /// Highest release that is strictly newer than the installed one and
    /// compatible with this host. `None` when nothing is installed.
    pub async fn check_for_updates(
        &self,
        extension_id: &str,
        available: &[ExtensionVersion],
    ) -> Option<ExtensionVersion> {
        let installed = self.installed_semver(extension_id).await?;

        available
            .iter()
            .filter_map(|candidate| {
                let version = Version::parse(candidate.version.trim()).ok()?;
                (version > installed && self.is_compatible(candidate).compatible)
                    .then_some((version, candidate))
            })
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, candidate)| candidate.clone())
    }

    pub async fn get_installed_version(&self, extension_id: &str) -> Option<String> {
        self.inner.installed.read().await.get(extension_id).cloned()
    }

    pub async fn installed_versions(&self) -> BTreeMap<String, String> {
        self.inner.installed.read().await.clone()
    }

    pub async fn set_installed_version(&self, extension_id: &str, version: &str) -> Result<()> {
        let version = Version::parse(version.trim())?.to_string();
        let id = extension_id.to_string();
        let recorded = version.clone();
        self.commit(move |installed| installed.insert(id, recorded.clone()).as_ref() != Some(&recorded))
            .await?;
        info!(extension_id, %version, "Recorded installed version");
        Ok(())
    }

    /// Drop the installed version record.
    ///
    /// # Returns
    /// `true` if a version was recorded
    pub async fn remove_installed_version(&self, extension_id: &str) -> Result<bool> {
        let id = extension_id.to_string();
        let removed = self
            .commit(move |installed| installed.remove(&id).is_some())
            .await?;
        if removed {
            info!(extension_id, "Removed installed version record");
        }
        Ok(removed)
    }

    /// Re-record an older version as installed.
    pub async fn rollback(&self, extension_id: &str, target: &str) -> Result<()> {
        let previous = self.get_installed_version(extension_id).await;
        self.set_installed_version(extension_id, target).await?;
        info!(
            extension_id,
            from = previous.as_deref().unwrap_or("none"),
            to = target,
            "Rolled back extension version"
        );
        Ok(())
    }

    async fn installed_semver(&self, extension_id: &str) -> Option<Version> {
        let installed = self.get_installed_version(extension_id).await?;
        match Version::parse(&installed) {
            Ok(version) => Some(version),
            Err(e) => {
                warn!(extension_id, %installed, error = %e, "Ignoring unparseable installed version");
                None
            }
        }
    }

    async fn commit<F>(&self, change: F) -> Result<bool>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _guard = inner.commit_lock.lock().await;

            let mut next = inner.installed.read().await.clone();
            if !change(&mut next) {
                return Ok(false);
            }

            let value = serde_json::to_value(&next)?;
            inner
                .storage
                .set(HOST_OWNER, StorageScope::Host, INSTALLED_VERSIONS_KEY, value)
                .await?;
            *inner.installed.write().await = next;
            Ok::<_, StoreError>(true)
        })
        .await
        .map_err(|e| StoreError::CommitFailed(e.to_string()))?
    }
}

impl std::fmt::Debug for VersionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionManager")
            .field("host_version", &self.inner.host_version)
            .finish_non_exhaustive()
    }
}
