//! Warden Store - durable host bookkeeping for extensions
//!
//! This crate owns the state the host keeps about extensions between runs:
//!
//! - **Permissions**: granted and denied capabilities per extension, with a
//!   single-flight prompt for undecided requests
//! - **Versions**: the installed version record and the compatibility and
//!   update rules checked before anything is installed
//! - **Packages**: parsing and integrity verification of extension bundles
//!
//! Persistence goes through the injected [`warden_storage::StoragePort`], under
//! the host scope.

pub mod error;
pub mod package;
pub mod permissions;
pub mod versions;

pub use error::{Result, StoreError};
pub use package::ExtensionPackage;
pub use permissions::{
    AllowAll, DEFAULT_PROMPT_TIMEOUT, DenyAll, PermissionPrompt, PermissionRequest,
    PermissionState, PermissionStore,
};
pub use versions::{Compatibility, UpdateCheck, VersionManager};

/// Storage owner used for everything the host persists about extensions.
pub const HOST_OWNER: &str = "host";
