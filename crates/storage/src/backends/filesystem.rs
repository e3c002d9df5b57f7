//! Filesystem-based storage backend.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, StorageError};
use crate::traits::{StoragePort, StorageScope};

type Document = BTreeMap<String, Value>;

/// Filesystem-based storage backend.
///
/// Values are grouped into one JSON document per owner and scope:
///
/// Directory structure:
/// ```text
/// storage_root/
/// +-- {owner}/
///     +-- workspace.json
///     +-- global.json
///     +-- host.json
/// ```
///
/// Every mutation rewrites the document into a sibling temp file and renames
/// it over the original, so readers never observe a half written document.
#[derive(Debug)]
pub struct FilesystemStorage {
    root_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FilesystemStorage {
    /// Create a new filesystem storage backend rooted at `root_path`.
    pub fn new<P: AsRef<Path>>(root_path: P) -> Self {
        Self {
            root_path: root_path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Create the root directory if it does not exist yet.
    pub async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root_path)
            .await
            .map_err(|e| StorageError::io("create_dir", &self.root_path, e))
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn document_path(&self, owner: &str, scope: StorageScope) -> Result<PathBuf> {
        validate_owner(owner)?;
        Ok(self
            .root_path
            .join(owner)
            .join(format!("{}.json", scope.as_str())))
    }

    async fn load_document(&self, path: &Path) -> Result<Document> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Document::new()),
            Err(e) => return Err(StorageError::io("read", path, e)),
        };

        serde_json::from_str(&content).map_err(|source| StorageError::CorruptDocument {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load a document for mutation. A corrupt document is discarded so the
    /// backend can recover by overwriting it.
    async fn load_document_for_write(&self, path: &Path) -> Result<Document> {
        match self.load_document(path).await {
            Err(StorageError::CorruptDocument { path, source }) => {
                warn!(path = %path.display(), error = %source, "Discarding corrupt storage document");
                Ok(Document::new())
            }
            other => other,
        }
    }

    async fn save_document(&self, path: &Path, document: &Document) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io("create_dir", parent, e))?;
        }

        let content = serde_json::to_vec_pretty(document)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content)
            .await
            .map_err(|e| StorageError::io("write", &temp_path, e))?;
        fs::rename(&temp_path, path)
            .await
            .map_err(|e| StorageError::io("rename", path, e))?;

        debug!(path = %path.display(), entries = document.len(), "Saved storage document");
        Ok(())
    }
}

/// Owners become directory names, so they are restricted to a safe alphabet.
fn validate_owner(owner: &str) -> Result<()> {
    let valid = !owner.is_empty()
        && !owner.starts_with('.')
        && owner
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidOwner(owner.to_string()))
    }
}

#[async_trait]
impl StoragePort for FilesystemStorage {
    async fn get(&self, owner: &str, scope: StorageScope, key: &str) -> Result<Option<Value>> {
        let path = self.document_path(owner, scope)?;
        let mut document = self.load_document(&path).await?;
        Ok(document.remove(key))
    }

    async fn set(&self, owner: &str, scope: StorageScope, key: &str, value: Value) -> Result<()> {
        let path = self.document_path(owner, scope)?;
        let _guard = self.write_lock.lock().await;

        let mut document = self.load_document_for_write(&path).await?;
        document.insert(key.to_string(), value);
        self.save_document(&path, &document).await
    }

    async fn delete(&self, owner: &str, scope: StorageScope, key: &str) -> Result<bool> {
        let path = self.document_path(owner, scope)?;
        let _guard = self.write_lock.lock().await;

        let mut document = self.load_document_for_write(&path).await?;
        if document.remove(key).is_none() {
            return Ok(false);
        }
        self.save_document(&path, &document).await?;
        Ok(true)
    }

    async fn keys(&self, owner: &str, scope: StorageScope) -> Result<Vec<String>> {
        let path = self.document_path(owner, scope)?;
        let document = self.load_document(&path).await?;
        Ok(document.into_keys().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn values_survive_a_new_backend_instance() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(temp_dir.path());
        storage
            .set("lab-monitor", StorageScope::Global, "interval", json!(30))
            .await
            .unwrap();

        let reopened = FilesystemStorage::new(temp_dir.path());
        assert_eq!(
            reopened
                .get("lab-monitor", StorageScope::Global, "interval")
                .await
                .unwrap(),
            Some(json!(30))
        );
        assert!(temp_dir.path().join("lab-monitor").join("global.json").exists());
    }

    #[tokio::test]
    async fn missing_document_reads_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(temp_dir.path().join("not-created"));

        assert_eq!(
            storage.get("x", StorageScope::Workspace, "k").await.unwrap(),
            None
        );
        assert!(storage.keys("x", StorageScope::Workspace).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_document_errors_on_read_and_is_replaced_on_write() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(temp_dir.path());
        let owner_dir = temp_dir.path().join("host");
        std::fs::create_dir_all(&owner_dir).unwrap();
        std::fs::write(owner_dir.join("host.json"), "{ truncated").unwrap();

        let result = storage.get("host", StorageScope::Host, "k").await;
        assert!(matches!(result, Err(StorageError::CorruptDocument { .. })));

        storage
            .set("host", StorageScope::Host, "k", json!("v"))
            .await
            .unwrap();
        assert_eq!(
            storage.get("host", StorageScope::Host, "k").await.unwrap(),
            Some(json!("v"))
        );
    }

    #[tokio::test]
    async fn no_temp_file_is_left_behind() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(temp_dir.path());
        storage
            .set("a", StorageScope::Workspace, "k", json!(true))
            .await
            .unwrap();
        assert!(storage.delete("a", StorageScope::Workspace, "k").await.unwrap());

        let entries: Vec<_> = std::fs::read_dir(temp_dir.path().join("a"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec!["workspace.json".to_string()]);
    }

    #[tokio::test]
    async fn rejects_owners_that_escape_the_root() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(temp_dir.path());

        for owner in ["", "..", "../etc", "a/b"] {
            let result = storage
                .set(owner, StorageScope::Global, "k", json!(1))
                .await;
            assert!(
                matches!(result, Err(StorageError::InvalidOwner(_))),
                "{owner:?} should be rejected"
            );
        }
    }
}
