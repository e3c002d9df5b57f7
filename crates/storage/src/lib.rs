//! Key-value persistence port for the Warden extension host.
//!
//! Everything the host persists (permission decisions, installed versions and
//! the per-extension workspace/global settings) goes through [`StoragePort`].
//! Two backends ship with the crate: [`MemoryStorage`] for tests and ephemeral
//! hosts, and [`FilesystemStorage`] which keeps one JSON document per owner and
//! scope.

pub mod backends;
pub mod error;
pub mod scoped;
pub mod traits;

pub use backends::{FilesystemStorage, MemoryStorage};
pub use error::{Result, StorageError};
pub use scoped::ScopedStorage;
pub use traits::{StoragePort, StorageScope};
