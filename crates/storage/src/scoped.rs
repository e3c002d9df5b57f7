use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::Result;
use crate::traits::{StoragePort, StorageScope};

/// Storage handle bound to one owner and one scope.
///
/// This is what an extension receives as its workspace or global state. Values
/// are JSON encoded; a stored value that no longer decodes into the requested
/// type reads as absent.
#[derive(Clone)]
pub struct ScopedStorage {
    port: Arc<dyn StoragePort>,
    owner: String,
    scope: StorageScope,
}

impl ScopedStorage {
    pub fn new(port: Arc<dyn StoragePort>, owner: impl Into<String>, scope: StorageScope) -> Self {
        Self {
            port,
            owner: owner.into(),
            scope,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn scope(&self) -> StorageScope {
        self.scope
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(value) = self.port.get(&self.owner, self.scope, key).await? else {
            return Ok(None);
        };

        match serde_json::from_value(value) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                debug!(
                    owner = %self.owner,
                    scope = %self.scope,
                    key,
                    error = %e,
                    "Stored value does not decode, treating as absent"
                );
                Ok(None)
            }
        }
    }

    /// Store `value` under `key`, or remove the key when `value` is `None`.
    pub async fn update<T: Serialize>(&self, key: &str, value: Option<T>) -> Result<()> {
        match value {
            Some(value) => {
                let encoded = serde_json::to_value(value)?;
                self.port.set(&self.owner, self.scope, key, encoded).await
            }
            None => {
                self.port.delete(&self.owner, self.scope, key).await?;
                Ok(())
            }
        }
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        self.port.keys(&self.owner, self.scope).await
    }
}

impl std::fmt::Debug for ScopedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedStorage")
            .field("owner", &self.owner)
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryStorage;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Layout {
        width: u32,
        collapsed: bool,
    }

    fn handle(port: &Arc<MemoryStorage>, scope: StorageScope) -> ScopedStorage {
        ScopedStorage::new(port.clone(), "patients", scope)
    }

    #[tokio::test]
    async fn typed_values_round_trip() {
        let port = Arc::new(MemoryStorage::new());
        let workspace = handle(&port, StorageScope::Workspace);

        let layout = Layout {
            width: 320,
            collapsed: false,
        };
        workspace.update("layout", Some(&layout)).await.unwrap();

        assert_eq!(workspace.get::<Layout>("layout").await.unwrap(), Some(layout));
        assert_eq!(workspace.keys().await.unwrap(), vec!["layout"]);
    }

    #[tokio::test]
    async fn undecodable_values_read_as_absent() {
        let port = Arc::new(MemoryStorage::new());
        let global = handle(&port, StorageScope::Global);
        global.update("layout", Some("not a layout")).await.unwrap();

        assert_eq!(global.get::<Layout>("layout").await.unwrap(), None);
        assert_eq!(
            global.get::<String>("layout").await.unwrap().as_deref(),
            Some("not a layout")
        );
    }

    #[tokio::test]
    async fn update_with_none_removes_the_key() {
        let port = Arc::new(MemoryStorage::new());
        let workspace = handle(&port, StorageScope::Workspace);
        let global = handle(&port, StorageScope::Global);
        workspace.update("count", Some(3u32)).await.unwrap();
        global.update("count", Some(7u32)).await.unwrap();

        workspace.update::<u32>("count", None).await.unwrap();

        assert_eq!(workspace.get::<u32>("count").await.unwrap(), None);
        assert_eq!(global.get::<u32>("count").await.unwrap(), Some(7));
    }
}
