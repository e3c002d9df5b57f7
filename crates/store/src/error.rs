use thiserror::Error;
use warden_storage::StorageError;
use warden_types::ManifestError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(#[from] ManifestError),

    #[error("Invalid package: {reason}")]
    InvalidPackage { reason: String },

    #[error("Payload integrity mismatch for extension '{extension_id}': expected {expected}")]
    IntegrityMismatch {
        extension_id: String,
        expected: String,
    },

    #[error("Invalid version format: {0}")]
    InvalidVersion(#[from] semver::Error),

    #[error("IO operation '{operation}' failed on path '{path}': {source}")]
    IoOperation {
        operation: String,
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("Background commit failed: {0}")]
    CommitFailed(String),
}

impl StoreError {
    pub(crate) fn invalid_package(reason: impl Into<String>) -> Self {
        StoreError::InvalidPackage {
            reason: reason.into(),
        }
    }

    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidManifest(_)
                | StoreError::InvalidPackage { .. }
                | StoreError::IntegrityMismatch { .. }
                | StoreError::InvalidVersion(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
