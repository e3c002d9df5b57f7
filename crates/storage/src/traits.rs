//! Trait definitions for the storage port.

use std::fmt::Display;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Namespace a value lives in, relative to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageScope {
    /// Settings tied to the currently open workspace.
    Workspace,
    /// Settings shared across every workspace.
    Global,
    /// Host bookkeeping. Never handed to extension code.
    Host,
}

impl StorageScope {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageScope::Workspace => "workspace",
            StorageScope::Global => "global",
            StorageScope::Host => "host",
        }
    }
}

impl Display for StorageScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key-value persistence injected into every component that stores state.
///
/// Values are addressed by `(owner, scope, key)`. The owner is an extension
/// identity or a host component name. Each `set` and `delete` must be atomic
/// with respect to readers: they either observe the old value or the new one.
#[async_trait]
pub trait StoragePort: Send + Sync {
    /// Get a value, `None` when it was never set or has been deleted.
    async fn get(&self, owner: &str, scope: StorageScope, key: &str) -> Result<Option<Value>>;

    /// Insert or replace a value.
    async fn set(&self, owner: &str, scope: StorageScope, key: &str, value: Value) -> Result<()>;

    /// Remove a value.
    ///
    /// # Returns
    /// `true` if the value existed
    async fn delete(&self, owner: &str, scope: StorageScope, key: &str) -> Result<bool>;

    /// List the keys stored for an owner in a scope, sorted.
    async fn keys(&self, owner: &str, scope: StorageScope) -> Result<Vec<String>>;
}
