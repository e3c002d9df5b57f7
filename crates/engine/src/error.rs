use warden_storage::StorageError;
use warden_store::StoreError;
use warden_types::{Capability, ManifestError};

use crate::http::ResponseError;

pub type Result<T> = std::result::Result<T, Error>;

/// This defines the error types used by the extension host.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The manifest failed validation. Decided before any extension code runs.
    #[error("Invalid manifest: {0}")]
    ManifestInvalid(#[from] ManifestError),

    /// The sandbox produced a module without the required entry points.
    #[error("Extension '{extension_id}' does not expose a valid module: {reason}")]
    ModuleShapeInvalid {
        extension_id: String,
        reason: String,
    },

    /// The payload digest differs from the manifest's integrity field. The
    /// payload is never executed.
    #[error("Payload integrity mismatch for extension '{extension_id}': expected {expected}, got {actual}")]
    PayloadIntegrityMismatch {
        extension_id: String,
        expected: String,
        actual: String,
    },

    /// Returned to the specific gate call that needed the capability.
    #[error("Extension '{extension_id}' does not have {capability} permission")]
    PermissionDenied {
        extension_id: String,
        capability: Capability,
    },

    #[error("Extension '{extension_id}' {version} is incompatible with this host: {reason}")]
    VersionIncompatible {
        extension_id: String,
        version: String,
        reason: String,
    },

    #[error("Cannot install '{extension_id}' {version}: {reason}")]
    UpdateRejected {
        extension_id: String,
        version: String,
        reason: String,
    },

    #[error("Command '{0}' not found")]
    CommandNotFound(String),

    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    /// `activate` returned an error or panicked.
    #[error("Activation of '{extension_id}' failed: {message}")]
    ActivationFailed {
        extension_id: String,
        message: String,
    },

    #[error("Extension '{0}' is not loaded")]
    NotLoaded(String),

    #[error("Extension '{0}' is not installed")]
    NotInstalled(String),

    #[error("Sandbox error for '{extension_id}': {message}")]
    Sandbox {
        extension_id: String,
        message: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] ResponseError),

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl Error {
    pub fn sandbox(extension_id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Sandbox {
            extension_id: extension_id.into(),
            message: message.into(),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Error::PermissionDenied { .. })
    }
}
