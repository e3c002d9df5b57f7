use std::sync::Arc;

use eyre::Result;
use warden_engine::HostConfig;
use warden_storage::{FilesystemStorage, StoragePort};
use warden_store::{DenyAll, PermissionStore, VersionManager};

/// Host bookkeeping opened from the configured data directory.
pub struct HostState {
    pub permissions: PermissionStore,
    pub versions: VersionManager,
}

impl HostState {
    pub async fn open(config: &HostConfig) -> Result<Self> {
        let storage = FilesystemStorage::new(&config.data_dir);
        storage.initialize().await?;
        let storage: Arc<dyn StoragePort> = Arc::new(storage);

        // The CLI only applies explicit decisions, so nothing may prompt.
        let permissions =
            PermissionStore::load(storage.clone(), Arc::new(DenyAll), config.prompt_timeout())
                .await;
        let versions = VersionManager::load(storage, config.host_semver()?).await;

        Ok(Self {
            permissions,
            versions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use warden_types::Capability;

    #[tokio::test]
    async fn decisions_persist_under_data_dir() {
        let dir = TempDir::new().unwrap();
        let config = HostConfig {
            data_dir: dir.path().join("data"),
            ..HostConfig::default()
        };

        let state = HostState::open(&config).await.unwrap();
        state
            .permissions
            .grant("lab", Capability::NetworkHttp)
            .await
            .unwrap();
        state.versions.set_installed_version("lab", "1.4.0").await.unwrap();

        let reopened = HostState::open(&config).await.unwrap();
        assert!(
            reopened
                .permissions
                .has_permission("lab", Capability::NetworkHttp)
                .await
        );
        assert_eq!(
            reopened.versions.get_installed_version("lab").await.as_deref(),
            Some("1.4.0")
        );
    }
}
