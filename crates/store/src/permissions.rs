use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, error, info, warn};
use warden_storage::{StoragePort, StorageScope};
use warden_types::Capability;

use crate::HOST_OWNER;
use crate::error::{Result, StoreError};

const PERMISSIONS_KEY: &str = "extension-permissions";

/// How long a permission prompt may stay unanswered before it counts as denied.
pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Undecided,
    Granted,
    Denied,
}

impl Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionState::Undecided => write!(f, "undecided"),
            PermissionState::Granted => write!(f, "granted"),
            PermissionState::Denied => write!(f, "denied"),
        }
    }
}

/// What the host shows the user when an extension asks for a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRequest {
    pub extension_id: String,
    pub capability: Capability,
    pub reason: Option<String>,
}

/// Host surface that asks the user to decide on a permission request.
#[async_trait]
pub trait PermissionPrompt: Send + Sync {
    /// Resolve to `true` to grant, `false` to deny.
    async fn prompt(&self, request: &PermissionRequest) -> bool;
}

/// Prompt that denies everything. Used by headless hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

#[async_trait]
impl PermissionPrompt for DenyAll {
    async fn prompt(&self, _request: &PermissionRequest) -> bool {
        false
    }
}

/// Prompt that grants everything. Intended for development hosts and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl PermissionPrompt for AllowAll {
    async fn prompt(&self, _request: &PermissionRequest) -> bool {
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct PermissionDocument {
    #[serde(default)]
    granted: BTreeMap<String, BTreeSet<Capability>>,
    #[serde(default)]
    denied: BTreeMap<String, BTreeSet<Capability>>,
}

impl PermissionDocument {
    fn state(&self, extension_id: &str, capability: Capability) -> PermissionState {
        let contains = |map: &BTreeMap<String, BTreeSet<Capability>>| {
            map.get(extension_id)
                .is_some_and(|set| set.contains(&capability))
        };

        if contains(&self.granted) {
            PermissionState::Granted
        } else if contains(&self.denied) {
            PermissionState::Denied
        } else {
            PermissionState::Undecided
        }
    }

    /// Record a decision; the opposite decision is cleared.
    fn decide(&mut self, extension_id: &str, capability: Capability, granted: bool) -> bool {
        let (add_to, remove_from) = if granted {
            (&mut self.granted, &mut self.denied)
        } else {
            (&mut self.denied, &mut self.granted)
        };

        let removed = remove(remove_from, extension_id, capability);
        let added = add_to
            .entry(extension_id.to_string())
            .or_default()
            .insert(capability);
        added || removed
    }

    fn revoke(&mut self, extension_id: &str, capability: Capability) -> bool {
        remove(&mut self.granted, extension_id, capability)
    }

    fn list(
        map: &BTreeMap<String, BTreeSet<Capability>>,
        extension_id: &str,
    ) -> Vec<Capability> {
        map.get(extension_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

fn remove(
    map: &mut BTreeMap<String, BTreeSet<Capability>>,
    extension_id: &str,
    capability: Capability,
) -> bool {
    let Some(set) = map.get_mut(extension_id) else {
        return false;
    };
    let removed = set.remove(&capability);
    if set.is_empty() {
        map.remove(extension_id);
    }
    removed
}

type PendingKey = (String, Capability);

struct Inner {
    storage: Arc<dyn StoragePort>,
    prompt: Arc<dyn PermissionPrompt>,
    prompt_timeout: Duration,
    state: RwLock<PermissionDocument>,
    /// Serializes writers so decide, persist and commit happen as one step.
    commit_lock: Mutex<()>,
    /// One shared prompt per undecided `(extension, capability)` pair.
    pending: DashMap<PendingKey, Arc<OnceCell<Option<bool>>>>,
}

/// Persistent record of which capabilities each extension was granted or denied.
///
/// Cloning is cheap; every clone shares the same state.
#[derive(Clone)]
pub struct PermissionStore {
    inner: Arc<Inner>,
}

impl PermissionStore {
    /// Load persisted decisions. Missing or corrupt data starts from an empty
    /// store instead of failing.
    pub async fn load(
        storage: Arc<dyn StoragePort>,
        prompt: Arc<dyn PermissionPrompt>,
        prompt_timeout: Duration,
    ) -> Self {
        let document = match storage
            .get(HOST_OWNER, StorageScope::Host, PERMISSIONS_KEY)
            .await
        {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(error = %e, "Persisted permissions are corrupt, starting empty");
                PermissionDocument::default()
            }),
            Ok(None) => PermissionDocument::default(),
            Err(e) => {
                warn!(error = %e, "Failed to read persisted permissions, starting empty");
                PermissionDocument::default()
            }
        };

        debug!(
            extensions = document.granted.len() + document.denied.len(),
            "Loaded permission store"
        );

        Self {
            inner: Arc::new(Inner {
                storage,
                prompt,
                prompt_timeout,
                state: RwLock::new(document),
                commit_lock: Mutex::new(()),
                pending: DashMap::new(),
            }),
        }
    }

    pub fn prompt_timeout(&self) -> Duration {
        self.inner.prompt_timeout
    }

    pub async fn state(&self, extension_id: &str, capability: Capability) -> PermissionState {
        self.inner.state.read().await.state(extension_id, capability)
    }

    /// Pure lookup; never prompts.
    pub async fn has_permission(&self, extension_id: &str, capability: Capability) -> bool {
        self.state(extension_id, capability).await == PermissionState::Granted
    }

    /// Resolve whether `extension_id` may use `capability`, prompting the user
    /// if no decision has been recorded yet.
    ///
    /// Concurrent requests for the same pair share one prompt. A prompt that
    /// times out, or whose answer cannot be persisted, denies this request
    /// only and leaves the pair undecided.
    pub async fn request_permission(
        &self,
        extension_id: &str,
        capability: Capability,
        reason: Option<&str>,
    ) -> bool {
        match self.state(extension_id, capability).await {
            PermissionState::Granted => {
                debug!(extension_id, %capability, "Permission already granted");
                return true;
            }
            PermissionState::Denied => {
                debug!(extension_id, %capability, "Permission already denied");
                return false;
            }
            PermissionState::Undecided => {}
        }

        let key = (extension_id.to_string(), capability);
        let cell = self.inner.pending.entry(key.clone()).or_default().clone();

        let request = PermissionRequest {
            extension_id: extension_id.to_string(),
            capability,
            reason: reason.map(str::to_string),
        };
        let outcome = *cell.get_or_init(|| self.prompt_and_record(request)).await;

        self.inner
            .pending
            .remove_if(&key, |_, pending| Arc::ptr_eq(pending, &cell));

        match outcome {
            Some(granted) => granted,
            None => false,
        }
    }

    async fn prompt_and_record(&self, request: PermissionRequest) -> Option<bool> {
        // Another request may have finished between the first lookup and now.
        match self.state(&request.extension_id, request.capability).await {
            PermissionState::Granted => return Some(true),
            PermissionState::Denied => return Some(false),
            PermissionState::Undecided => {}
        }

        info!(
            extension_id = %request.extension_id,
            capability = %request.capability,
            "Prompting for permission"
        );

        let decision = match tokio::time::timeout(
            self.inner.prompt_timeout,
            self.inner.prompt.prompt(&request),
        )
        .await
        {
            Ok(decision) => decision,
            Err(_) => {
                warn!(
                    extension_id = %request.extension_id,
                    capability = %request.capability,
                    timeout_secs = self.inner.prompt_timeout.as_secs(),
                    "Permission prompt timed out, denying"
                );
                return None;
            }
        };

        let result = if decision {
            self.grant(&request.extension_id, request.capability).await
        } else {
            self.deny(&request.extension_id, request.capability).await
        };
        match result {
            Ok(()) => Some(decision),
            Err(e) => {
                // Nothing was recorded, so this request is denied and the
                // next one prompts again.
                error!(
                    extension_id = %request.extension_id,
                    capability = %request.capability,
                    error = %e,
                    "Failed to persist permission decision, denying"
                );
                None
            }
        }
    }

    /// Grant a capability, clearing any prior denial.
    pub async fn grant(&self, extension_id: &str, capability: Capability) -> Result<()> {
        let id = extension_id.to_string();
        if self
            .commit(move |document| document.decide(&id, capability, true))
            .await?
        {
            info!(extension_id, %capability, "Permission granted");
        }
        Ok(())
    }

    /// Deny a capability, clearing any prior grant.
    pub async fn deny(&self, extension_id: &str, capability: Capability) -> Result<()> {
        let id = extension_id.to_string();
        if self
            .commit(move |document| document.decide(&id, capability, false))
            .await?
        {
            warn!(extension_id, %capability, "Permission denied");
        }
        Ok(())
    }

    /// Remove a grant. Denials are left untouched.
    ///
    /// # Returns
    /// `true` if the capability had been granted
    pub async fn revoke(&self, extension_id: &str, capability: Capability) -> Result<bool> {
        let id = extension_id.to_string();
        let revoked = self
            .commit(move |document| document.revoke(&id, capability))
            .await?;
        if revoked {
            info!(extension_id, %capability, "Permission revoked");
        }
        Ok(revoked)
    }

    pub async fn get_granted_permissions(&self, extension_id: &str) -> Vec<Capability> {
        let state = self.inner.state.read().await;
        PermissionDocument::list(&state.granted, extension_id)
    }

    pub async fn get_denied_permissions(&self, extension_id: &str) -> Vec<Capability> {
        let state = self.inner.state.read().await;
        PermissionDocument::list(&state.denied, extension_id)
    }

    /// Every extension with at least one recorded decision, sorted.
    pub async fn extensions(&self) -> Vec<String> {
        let state = self.inner.state.read().await;
        let ids: BTreeSet<&String> = state.granted.keys().chain(state.denied.keys()).collect();
        ids.into_iter().cloned().collect()
    }

    /// Apply `change` to a copy of the state, persist the copy, then swap it in.
    ///
    /// Runs on a detached task so that dropping the caller cannot interrupt the
    /// sequence halfway.
    async fn commit<F>(&self, change: F) -> Result<bool>
    where
        F: FnOnce(&mut PermissionDocument) -> bool + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _guard = inner.commit_lock.lock().await;

            let mut next = inner.state.read().await.clone();
            if !change(&mut next) {
                return Ok(false);
            }

            let value = serde_json::to_value(&next)?;
            inner
                .storage
                .set(HOST_OWNER, StorageScope::Host, PERMISSIONS_KEY, value)
                .await?;
            *inner.state.write().await = next;
            Ok::<_, StoreError>(true)
        })
        .await
        .map_err(|e| StoreError::CommitFailed(e.to_string()))?
    }
}

impl std::fmt::Debug for PermissionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionStore")
            .field("prompt_timeout", &self.inner.prompt_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warden_storage::{MemoryStorage, StorageError};

    /// Answers with a fixed decision after an optional delay and counts calls.
    struct ScriptedPrompt {
        decision: bool,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedPrompt {
        fn new(decision: bool) -> Arc<Self> {
            Self::delayed(decision, Duration::ZERO)
        }

        fn delayed(decision: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                decision,
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PermissionPrompt for ScriptedPrompt {
        async fn prompt(&self, _request: &PermissionRequest) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.decision
        }
    }

    async fn store_with(
        storage: Arc<MemoryStorage>,
        prompt: Arc<ScriptedPrompt>,
    ) -> PermissionStore {
        PermissionStore::load(storage, prompt, DEFAULT_PROMPT_TIMEOUT).await
    }

    #[tokio::test]
    async fn granted_permission_is_answered_without_prompting() {
        let prompt = ScriptedPrompt::new(false);
        let store = store_with(Arc::new(MemoryStorage::new()), prompt.clone()).await;

        store.grant("lab", Capability::NetworkHttp).await.unwrap();

        assert!(store.request_permission("lab", Capability::NetworkHttp, None).await);
        assert!(store.request_permission("lab", Capability::NetworkHttp, None).await);
        assert_eq!(prompt.calls(), 0);
    }

    #[tokio::test]
    async fn denied_permission_is_answered_without_prompting_until_revoked() {
        let prompt = ScriptedPrompt::new(true);
        let store = store_with(Arc::new(MemoryStorage::new()), prompt.clone()).await;

        store.deny("lab", Capability::ClipboardRead).await.unwrap();
        assert!(!store.request_permission("lab", Capability::ClipboardRead, None).await);
        assert_eq!(prompt.calls(), 0);

        // Revoke only clears grants, so the denial stays authoritative.
        assert!(!store.revoke("lab", Capability::ClipboardRead).await.unwrap());
        assert_eq!(
            store.state("lab", Capability::ClipboardRead).await,
            PermissionState::Denied
        );

        store.grant("lab", Capability::ClipboardRead).await.unwrap();
        assert!(store.revoke("lab", Capability::ClipboardRead).await.unwrap());
        assert!(store.request_permission("lab", Capability::ClipboardRead, None).await);
        assert_eq!(prompt.calls(), 1);
    }

    #[tokio::test]
    async fn undecided_request_prompts_once_and_persists() {
        let storage = Arc::new(MemoryStorage::new());
        let prompt = ScriptedPrompt::new(true);
        let store = store_with(storage.clone(), prompt.clone()).await;

        assert!(
            store
                .request_permission("lab", Capability::UiSidebar, Some("show results"))
                .await
        );
        assert!(store.request_permission("lab", Capability::UiSidebar, None).await);
        assert_eq!(prompt.calls(), 1);

        let reloaded = store_with(storage, ScriptedPrompt::new(false)).await;
        assert!(reloaded.has_permission("lab", Capability::UiSidebar).await);
    }

    #[tokio::test]
    async fn grant_clears_denial_and_deny_clears_grant() {
        let store = store_with(Arc::new(MemoryStorage::new()), ScriptedPrompt::new(false)).await;

        store.deny("lab", Capability::EventsEmit).await.unwrap();
        store.grant("lab", Capability::EventsEmit).await.unwrap();
        assert_eq!(store.get_granted_permissions("lab").await, vec![Capability::EventsEmit]);
        assert!(store.get_denied_permissions("lab").await.is_empty());

        store.deny("lab", Capability::EventsEmit).await.unwrap();
        assert!(store.get_granted_permissions("lab").await.is_empty());
        assert_eq!(store.get_denied_permissions("lab").await, vec![Capability::EventsEmit]);
        assert_eq!(store.extensions().await, vec!["lab".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_prompt() {
        let prompt = ScriptedPrompt::delayed(true, Duration::from_millis(50));
        let store = store_with(Arc::new(MemoryStorage::new()), prompt.clone()).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .request_permission("lab", Capability::NetworkHttp, None)
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(prompt.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_prompt_denies_without_persisting() {
        let storage = Arc::new(MemoryStorage::new());
        let prompt = ScriptedPrompt::delayed(true, Duration::from_secs(3600));
        let store =
            PermissionStore::load(storage.clone(), prompt.clone(), Duration::from_secs(5)).await;

        assert!(!store.request_permission("lab", Capability::ClipboardWrite, None).await);
        assert_eq!(
            store.state("lab", Capability::ClipboardWrite).await,
            PermissionState::Undecided
        );
        assert!(storage.is_empty());

        // The next request prompts again.
        assert!(!store.request_permission("lab", Capability::ClipboardWrite, None).await);
        assert_eq!(prompt.calls(), 2);
    }

    /// Storage that reads nothing and refuses every write.
    struct ReadOnlyStorage;

    #[async_trait]
    impl StoragePort for ReadOnlyStorage {
        async fn get(
            &self,
            _owner: &str,
            _scope: StorageScope,
            _key: &str,
        ) -> warden_storage::Result<Option<serde_json::Value>> {
            Ok(None)
        }

        async fn set(
            &self,
            _owner: &str,
            _scope: StorageScope,
            _key: &str,
            _value: serde_json::Value,
        ) -> warden_storage::Result<()> {
            Err(StorageError::Backend("read-only".to_string()))
        }

        async fn delete(
            &self,
            _owner: &str,
            _scope: StorageScope,
            _key: &str,
        ) -> warden_storage::Result<bool> {
            Err(StorageError::Backend("read-only".to_string()))
        }

        async fn keys(
            &self,
            _owner: &str,
            _scope: StorageScope,
        ) -> warden_storage::Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn unpersisted_grant_is_not_reported_as_granted() {
        let prompt = ScriptedPrompt::new(true);
        let store =
            PermissionStore::load(Arc::new(ReadOnlyStorage), prompt.clone(), DEFAULT_PROMPT_TIMEOUT)
                .await;

        assert!(!store.request_permission("lab", Capability::NetworkHttp, None).await);
        assert_eq!(
            store.state("lab", Capability::NetworkHttp).await,
            PermissionState::Undecided
        );
        assert!(store.grant("lab", Capability::NetworkHttp).await.is_err());

        assert!(!store.request_permission("lab", Capability::NetworkHttp, None).await);
        assert_eq!(prompt.calls(), 2);
    }

    #[tokio::test]
    async fn corrupt_persisted_data_fails_soft() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(
                HOST_OWNER,
                StorageScope::Host,
                PERMISSIONS_KEY,
                json!({ "granted": { "lab": ["not.a.capability"] } }),
            )
            .await
            .unwrap();

        let store = store_with(storage, ScriptedPrompt::new(false)).await;
        assert!(store.extensions().await.is_empty());
        assert!(!store.has_permission("lab", Capability::NetworkHttp).await);
    }

    #[tokio::test]
    async fn persisted_layout_uses_capability_ids() {
        let storage = Arc::new(MemoryStorage::new());
        let store = store_with(storage.clone(), ScriptedPrompt::new(false)).await;
        store.grant("lab", Capability::CommandsRegister).await.unwrap();
        store.deny("lab", Capability::NetworkHttp).await.unwrap();

        let value = storage
            .get(HOST_OWNER, StorageScope::Host, PERMISSIONS_KEY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            value,
            json!({
                "granted": { "lab": ["commands.register"] },
                "denied": { "lab": ["network.http"] }
            })
        );
    }
}
