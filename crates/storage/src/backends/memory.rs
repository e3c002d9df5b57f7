//! In-memory storage backend.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::Result;
use crate::traits::{StoragePort, StorageScope};

type EntryKey = (String, StorageScope, String);

/// Storage backend that keeps every value in process memory.
///
/// Nothing survives a restart. Used by tests and by hosts that do not need
/// persistence.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<EntryKey, Value>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn entry_key(owner: &str, scope: StorageScope, key: &str) -> EntryKey {
    (owner.to_string(), scope, key.to_string())
}

#[async_trait]
impl StoragePort for MemoryStorage {
    async fn get(&self, owner: &str, scope: StorageScope, key: &str) -> Result<Option<Value>> {
        Ok(self
            .entries
            .get(&entry_key(owner, scope, key))
            .map(|entry| entry.value().clone()))
    }

    async fn set(&self, owner: &str, scope: StorageScope, key: &str, value: Value) -> Result<()> {
        self.entries.insert(entry_key(owner, scope, key), value);
        Ok(())
    }

    async fn delete(&self, owner: &str, scope: StorageScope, key: &str) -> Result<bool> {
        Ok(self.entries.remove(&entry_key(owner, scope, key)).is_some())
    }

    async fn keys(&self, owner: &str, scope: StorageScope) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| {
                let (entry_owner, entry_scope, _) = entry.key();
                entry_owner == owner && *entry_scope == scope
            })
            .map(|entry| entry.key().2.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
