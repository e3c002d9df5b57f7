use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use warden_storage::{ScopedStorage, StoragePort, StorageScope};
use warden_store::PermissionStore;
use warden_types::{ExtensionManifest, Integrity};

use crate::context::ExtensionContext;
use crate::disposable::SubscriptionList;
use crate::error::{Error, Result};
use crate::gate::CapabilityGate;
use crate::registry::commands::panic_message;
use crate::sandbox::{ExtensionModule, SandboxHost};
use crate::services::HostServices;

/// Lifecycle status of one extension identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum ExtensionStatus {
    #[default]
    Unloaded,
    Loading,
    Active,
    Deactivating,
    Error(String),
}

impl ExtensionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, ExtensionStatus::Active)
    }
}

#[derive(Clone)]
struct Instance {
    manifest: Arc<ExtensionManifest>,
    payload: Arc<[u8]>,
    module: Arc<dyn ExtensionModule>,
    context: ExtensionContext,
    installed: bool,
    enabled: bool,
    loaded_at: DateTime<Utc>,
}

/// Snapshot of an active extension.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedExtension {
    pub manifest: ExtensionManifest,
    pub installed: bool,
    pub enabled: bool,
    pub loaded_at: DateTime<Utc>,
    pub subscriptions: usize,
}

impl From<&Instance> for LoadedExtension {
    fn from(instance: &Instance) -> Self {
        Self {
            manifest: instance.manifest.as_ref().clone(),
            installed: instance.installed,
            enabled: instance.enabled,
            loaded_at: instance.loaded_at,
            subscriptions: instance.context.subscription_count(),
        }
    }
}

/// What is needed to bring a replaced instance back: its verified source and
/// its flags.
pub(crate) struct InstanceSource {
    manifest: ExtensionManifest,
    payload: Arc<[u8]>,
    installed: bool,
    enabled: bool,
}

impl InstanceSource {
    pub(crate) fn version(&self) -> &str {
        &self.manifest.version
    }
}

/// Held while an operation on one extension identity is in progress.
pub(crate) struct IdentityGuard {
    _guard: OwnedMutexGuard<()>,
}

struct LoaderInner {
    sandbox: Arc<dyn SandboxHost>,
    services: HostServices,
    permissions: PermissionStore,
    storage: Arc<dyn StoragePort>,
    instances: DashMap<String, Instance>,
    statuses: DashMap<String, ExtensionStatus>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Creates, activates and tears down extension instances.
///
/// An instance becomes visible only after its `activate` has returned
/// successfully. Operations on the same extension id are serialized; distinct
/// ids proceed independently.
#[derive(Clone)]
pub struct ExtensionLoader {
    inner: Arc<LoaderInner>,
}

impl ExtensionLoader {
    pub fn new(
        sandbox: Arc<dyn SandboxHost>,
        services: HostServices,
        permissions: PermissionStore,
        storage: Arc<dyn StoragePort>,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                sandbox,
                services,
                permissions,
                storage,
                instances: DashMap::new(),
                statuses: DashMap::new(),
                locks: DashMap::new(),
            }),
        }
    }

    pub fn services(&self) -> &HostServices {
        &self.inner.services
    }

    pub fn permissions(&self) -> &PermissionStore {
        &self.inner.permissions
    }

    /// Verify, instantiate and activate an extension.
    ///
    /// Loading an id that is already active does nothing. If activation fails
    /// every registration made so far is released, no instance is kept and
    /// the status becomes [`ExtensionStatus::Error`]. Runs to completion even
    /// if the caller stops waiting.
    pub async fn load_extension(&self, manifest: ExtensionManifest, payload: &[u8]) -> Result<()> {
        manifest.validate()?;
        let loader = self.clone();
        let payload = payload.to_vec();

        tokio::spawn(async move {
            let _guard = loader.acquire(&manifest.id).await;
            loader.load_locked(manifest, &payload).await
        })
        .await
        .map_err(|e| Error::TaskFailed(e.to_string()))?
    }

    /// Deactivate an extension and release everything it registered.
    ///
    /// Runs to completion even if the caller stops waiting. A failing
    /// `deactivate` is logged and recorded in the status, and disposal still
    /// happens.
    pub async fn unload_extension(&self, extension_id: &str) -> Result<()> {
        let loader = self.clone();
        let extension_id = extension_id.to_string();

        tokio::spawn(async move {
            let _guard = loader.acquire(&extension_id).await;
            loader.unload_locked(&extension_id).await
        })
        .await
        .map_err(|e| Error::TaskFailed(e.to_string()))?
    }

    /// Unload the extension if it is loaded, then load `manifest`. Like
    /// [`unload_extension`](Self::unload_extension), both steps complete even
    /// if the caller stops waiting.
    pub async fn reload_extension(
        &self,
        manifest: ExtensionManifest,
        payload: &[u8],
    ) -> Result<()> {
        manifest.validate()?;
        let loader = self.clone();
        let payload = payload.to_vec();

        tokio::spawn(async move {
            let _guard = loader.acquire(&manifest.id).await;
            if loader.is_extension_loaded(&manifest.id) {
                loader.unload_locked(&manifest.id).await?;
            }
            loader.load_locked(manifest, &payload).await
        })
        .await
        .map_err(|e| Error::TaskFailed(e.to_string()))?
    }

    /// Mark a loaded extension installed (or not). Also sets `enabled`.
    pub async fn install_extension(&self, extension_id: &str, state: bool) -> Result<()> {
        let _guard = self.acquire(extension_id).await;
        self.mark_installed_locked(extension_id, state)
    }

    pub async fn enable_extension(&self, extension_id: &str, state: bool) -> Result<()> {
        let _guard = self.acquire(extension_id).await;
        self.set_flags(extension_id, |instance| instance.enabled = state)
    }

    /// Active extensions, sorted by id.
    pub fn get_loaded_extensions(&self) -> Vec<LoadedExtension> {
        let mut loaded: Vec<LoadedExtension> = self
            .inner
            .instances
            .iter()
            .map(|entry| LoadedExtension::from(entry.value()))
            .collect();
        loaded.sort_by(|a, b| a.manifest.id.cmp(&b.manifest.id));
        loaded
    }

    pub fn get_loaded_extension_by_id(&self, extension_id: &str) -> Option<LoadedExtension> {
        self.inner
            .instances
            .get(extension_id)
            .map(|entry| LoadedExtension::from(entry.value()))
    }

    pub fn get_loaded_manifest_by_id(&self, extension_id: &str) -> Option<ExtensionManifest> {
        self.inner
            .instances
            .get(extension_id)
            .map(|entry| entry.manifest.as_ref().clone())
    }

    pub fn is_extension_loaded(&self, extension_id: &str) -> bool {
        self.inner.instances.contains_key(extension_id)
    }

    pub fn status(&self, extension_id: &str) -> ExtensionStatus {
        self.inner
            .statuses
            .get(extension_id)
            .map(|status| status.value().clone())
            .unwrap_or_default()
    }

    /// Take the operation lock for `extension_id`.
    pub(crate) async fn acquire(&self, extension_id: &str) -> IdentityGuard {
        let lock = self
            .inner
            .locks
            .entry(extension_id.to_string())
            .or_default()
            .value()
            .clone();

        IdentityGuard {
            _guard: lock.lock_owned().await,
        }
    }

    pub(crate) async fn load_locked(
        &self,
        manifest: ExtensionManifest,
        payload: &[u8],
    ) -> Result<()> {
        let extension_id = manifest.id.clone();

        if self.is_extension_loaded(&extension_id) {
            debug!(%extension_id, "Extension already active, skipping load");
            return Ok(());
        }

        if !manifest.integrity.verify(payload) {
            let actual = Integrity::compute(manifest.integrity.algorithm, payload).to_string();
            warn!(%extension_id, expected = %manifest.integrity, %actual, "Payload integrity mismatch");
            self.set_status(&extension_id, ExtensionStatus::Error("payload integrity mismatch".into()));
            return Err(Error::PayloadIntegrityMismatch {
                extension_id,
                expected: manifest.integrity.to_string(),
                actual,
            });
        }

        info!(%extension_id, version = %manifest.version, "Loading extension");
        self.set_status(&extension_id, ExtensionStatus::Loading);

        let subscriptions = SubscriptionList::new();
        let mut pending = PendingLoad {
            loader: self,
            extension_id: extension_id.clone(),
            subscriptions: subscriptions.clone(),
            instantiated: false,
            armed: true,
        };

        let manifest = Arc::new(manifest);
        let module = match self.inner.sandbox.instantiate(&manifest, payload).await {
            Ok(module) => module,
            Err(e) => return Err(pending.fail(e).await),
        };
        pending.instantiated = true;

        if !module.exports().activate {
            let err = Error::ModuleShapeInvalid {
                extension_id: extension_id.clone(),
                reason: "module does not export an activate entry point".to_string(),
            };
            return Err(pending.fail(err).await);
        }

        let context = self.build_context(manifest.clone(), subscriptions);
        let outcome = AssertUnwindSafe(module.activate(&context))
            .catch_unwind()
            .await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(format!("activate panicked: {}", panic_message(&*panic))),
        };
        if let Some(message) = failure {
            error!(%extension_id, %message, "Extension activation failed");
            let err = Error::ActivationFailed {
                extension_id: extension_id.clone(),
                message,
            };
            return Err(pending.fail(err).await);
        }

        let registered = context.subscription_count();
        self.inner.instances.insert(
            extension_id.clone(),
            Instance {
                manifest,
                payload: Arc::from(payload),
                module,
                context,
                installed: false,
                enabled: false,
                loaded_at: Utc::now(),
            },
        );
        pending.disarm();
        self.set_status(&extension_id, ExtensionStatus::Active);

        info!(%extension_id, subscriptions = registered, "Extension activated");
        Ok(())
    }

    pub(crate) async fn unload_locked(&self, extension_id: &str) -> Result<()> {
        let instance = self
            .inner
            .instances
            .get(extension_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotLoaded(extension_id.to_string()))?;

        info!(extension_id, "Unloading extension");
        self.set_status(extension_id, ExtensionStatus::Deactivating);

        let mut failure = None;
        if instance.module.exports().deactivate {
            let outcome = AssertUnwindSafe(instance.module.deactivate())
                .catch_unwind()
                .await;
            failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(panic) => Some(format!("deactivate panicked: {}", panic_message(&*panic))),
            };
            if let Some(message) = &failure {
                error!(extension_id, %message, "Extension deactivation failed");
            }
        }

        let disposed = instance.context.subscriptions().dispose_all();
        self.inner.instances.remove(extension_id);

        if let Err(e) = self.inner.sandbox.teardown(extension_id).await {
            warn!(extension_id, error = %e, "Sandbox teardown failed");
        }

        match failure {
            Some(message) => self.set_status(extension_id, ExtensionStatus::Error(message)),
            None => self.set_status(extension_id, ExtensionStatus::Unloaded),
        }
        info!(extension_id, disposed, "Extension unloaded");
        Ok(())
    }

    pub(crate) fn mark_installed_locked(&self, extension_id: &str, state: bool) -> Result<()> {
        self.set_flags(extension_id, |instance| {
            instance.installed = state;
            instance.enabled = state;
        })
    }

    /// Source and flags of the loaded instance, if any.
    pub(crate) fn source_locked(&self, extension_id: &str) -> Option<InstanceSource> {
        self.inner.instances.get(extension_id).map(|entry| InstanceSource {
            manifest: entry.manifest.as_ref().clone(),
            payload: entry.payload.clone(),
            installed: entry.installed,
            enabled: entry.enabled,
        })
    }

    /// Load a previously captured instance again and restore its flags.
    pub(crate) async fn restore_locked(&self, source: InstanceSource) -> Result<()> {
        let extension_id = source.manifest.id.clone();
        self.load_locked(source.manifest, &source.payload).await?;
        self.set_flags(&extension_id, |instance| {
            instance.installed = source.installed;
            instance.enabled = source.enabled;
        })
    }

    fn build_context(
        &self,
        manifest: Arc<ExtensionManifest>,
        subscriptions: SubscriptionList,
    ) -> ExtensionContext {
        let storage = &self.inner.storage;
        let extension_id = manifest.id.as_str();
        let gate = CapabilityGate::new(
            extension_id,
            self.inner.permissions.clone(),
            self.inner.services.clone(),
            subscriptions.clone(),
        );

        ExtensionContext::new(
            gate,
            manifest.clone(),
            subscriptions,
            ScopedStorage::new(storage.clone(), extension_id, StorageScope::Workspace),
            ScopedStorage::new(storage.clone(), extension_id, StorageScope::Global),
        )
    }

    fn set_flags(&self, extension_id: &str, apply: impl FnOnce(&mut Instance)) -> Result<()> {
        let mut instance = self
            .inner
            .instances
            .get_mut(extension_id)
            .ok_or_else(|| Error::NotLoaded(extension_id.to_string()))?;
        apply(instance.value_mut());
        debug!(
            extension_id,
            installed = instance.installed,
            enabled = instance.enabled,
            "Updated extension flags"
        );
        Ok(())
    }

    fn set_status(&self, extension_id: &str, status: ExtensionStatus) {
        self.inner.statuses.insert(extension_id.to_string(), status);
    }
}

/// Rolls back a load that did not reach `Active`.
///
/// On an explicit failure [`fail`](Self::fail) records the error. If the load
/// future is dropped instead, `Drop` releases the partial registrations and
/// resets the status to `Unloaded`.
struct PendingLoad<'a> {
    loader: &'a ExtensionLoader,
    extension_id: String,
    subscriptions: SubscriptionList,
    instantiated: bool,
    armed: bool,
}

impl PendingLoad<'_> {
    async fn fail(&mut self, err: Error) -> Error {
        self.armed = false;
        let disposed = self.subscriptions.dispose_all();
        self.loader
            .set_status(&self.extension_id, ExtensionStatus::Error(err.to_string()));
        if self.instantiated {
            if let Err(e) = self.loader.inner.sandbox.teardown(&self.extension_id).await {
                warn!(extension_id = %self.extension_id, error = %e, "Sandbox teardown failed");
            }
        }
        debug!(extension_id = %self.extension_id, disposed, "Rolled back failed load");
        err
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingLoad<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        warn!(extension_id = %self.extension_id, "Load cancelled before activation completed");
        self.subscriptions.dispose_all();
        self.loader
            .set_status(&self.extension_id, ExtensionStatus::Unloaded);

        if self.instantiated {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let sandbox = self.loader.inner.sandbox.clone();
                let extension_id = self.extension_id.clone();
                handle.spawn(async move {
                    if let Err(e) = sandbox.teardown(&extension_id).await {
                        warn!(extension_id, error = %e, "Sandbox teardown failed");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{FnModule, StaticSandbox};
    use serde_json::Value;
    use std::time::Duration;
    use warden_storage::MemoryStorage;
    use warden_store::AllowAll;
    use warden_types::{ExtensionKind, Integrity};

    const PAYLOAD: &[u8] = b"module.exports = {}";

    fn manifest(id: &str) -> ExtensionManifest {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": "Lab Monitor",
            "version": "1.0.0",
            "kind": "background",
            "permissions": ["commands.register"],
            "icon": "L",
            "integrity": Integrity::sha256(PAYLOAD).to_string(),
        }))
        .unwrap()
    }

    async fn loader(sandbox: Arc<StaticSandbox>) -> ExtensionLoader {
        let storage: Arc<dyn StoragePort> = Arc::new(MemoryStorage::new());
        let permissions =
            PermissionStore::load(storage.clone(), Arc::new(AllowAll), Duration::from_secs(1)).await;
        ExtensionLoader::new(sandbox, HostServices::default(), permissions, storage)
    }

    #[tokio::test]
    async fn load_then_unload_round_trip() {
        let sandbox = Arc::new(StaticSandbox::new());
        sandbox.register(
            "lab",
            Arc::new(FnModule::new(|ctx| {
                async move {
                    ctx.api()
                        .register_command("lab.refresh", |_| async { Ok(Value::Null) })
                        .await?;
                    Ok(())
                }
                .boxed()
            })),
        );
        let loader = loader(sandbox.clone()).await;

        loader.load_extension(manifest("lab"), PAYLOAD).await.unwrap();
        assert!(loader.is_extension_loaded("lab"));
        assert_eq!(loader.status("lab"), ExtensionStatus::Active);
        assert_eq!(loader.get_loaded_extension_by_id("lab").unwrap().subscriptions, 1);
        assert_eq!(
            loader.get_loaded_manifest_by_id("lab").unwrap().kind,
            ExtensionKind::Background
        );
        assert!(sandbox.is_instantiated("lab"));

        loader.unload_extension("lab").await.unwrap();
        assert!(!loader.is_extension_loaded("lab"));
        assert!(!loader.services().commands.has_command("lab.refresh"));
        assert_eq!(loader.status("lab"), ExtensionStatus::Unloaded);
        assert!(!sandbox.is_instantiated("lab"));
    }

    #[tokio::test]
    async fn loading_an_active_extension_is_a_no_op() {
        let sandbox = Arc::new(StaticSandbox::new());
        let activations = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        {
            let activations = activations.clone();
            sandbox.register(
                "lab",
                Arc::new(FnModule::new(move |_| {
                    activations.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    async { Ok(()) }.boxed()
                })),
            );
        }
        let loader = loader(sandbox).await;

        loader.load_extension(manifest("lab"), PAYLOAD).await.unwrap();
        loader.load_extension(manifest("lab"), PAYLOAD).await.unwrap();
        assert_eq!(activations.load(std::sync::atomic::Ordering::SeqCst), 1);

        loader.reload_extension(manifest("lab"), PAYLOAD).await.unwrap();
        assert_eq!(activations.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn flags_require_a_loaded_instance() {
        let sandbox = Arc::new(StaticSandbox::new());
        sandbox.register("lab", Arc::new(FnModule::new(|_| async { Ok(()) }.boxed())));
        let loader = loader(sandbox).await;

        assert!(matches!(
            loader.install_extension("lab", true).await,
            Err(Error::NotLoaded(_))
        ));

        loader.load_extension(manifest("lab"), PAYLOAD).await.unwrap();
        loader.install_extension("lab", true).await.unwrap();
        loader.enable_extension("lab", false).await.unwrap();

        let loaded = loader.get_loaded_extension_by_id("lab").unwrap();
        assert!(loaded.installed);
        assert!(!loaded.enabled);
    }

    #[tokio::test]
    async fn unknown_module_surfaces_a_sandbox_error() {
        let loader = loader(Arc::new(StaticSandbox::new())).await;

        let err = loader.load_extension(manifest("ghost"), PAYLOAD).await.unwrap_err();
        assert!(matches!(err, Error::Sandbox { .. }));
        assert!(matches!(loader.status("ghost"), ExtensionStatus::Error(_)));
        assert!(matches!(
            loader.unload_extension("ghost").await,
            Err(Error::NotLoaded(_))
        ));
    }

    #[tokio::test]
    async fn dropped_load_rolls_back_partial_registrations() {
        let sandbox = Arc::new(StaticSandbox::new());
        sandbox.register(
            "lab",
            Arc::new(FnModule::new(|ctx| {
                async move {
                    ctx.api()
                        .register_command("lab.partial", |_| async { Ok(Value::Null) })
                        .await?;
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
                .boxed()
            })),
        );
        let loader = loader(sandbox.clone()).await;

        let load = loader.load_locked(manifest("lab"), PAYLOAD);
        assert!(tokio::time::timeout(Duration::from_millis(50), load).await.is_err());

        assert!(!loader.services().commands.has_command("lab.partial"));
        assert!(!loader.is_extension_loaded("lab"));
        assert_eq!(loader.status("lab"), ExtensionStatus::Unloaded);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!sandbox.is_instantiated("lab"));
    }

    #[tokio::test]
    async fn context_exposes_manifest_and_subscription_count() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let sandbox = Arc::new(StaticSandbox::new());
        {
            let seen = seen.clone();
            sandbox.register(
                "lab",
                Arc::new(FnModule::new(move |ctx| {
                    let seen = seen.clone();
                    async move {
                        ctx.api()
                            .register_command("lab.refresh", |_| async { Ok(Value::Null) })
                            .await?;
                        *seen.lock().unwrap() =
                            Some((ctx.manifest().version.clone(), ctx.subscription_count()));
                        Ok(())
                    }
                    .boxed()
                })),
            );
        }
        let loader = loader(sandbox).await;

        loader.load_extension(manifest("lab"), PAYLOAD).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(("1.0.0".to_string(), 1)));
        let source = loader.source_locked("lab").unwrap();
        assert_eq!(source.version(), "1.0.0");
        assert_eq!(&*source.payload, PAYLOAD);
    }

    #[test]
    fn status_serializes_with_message() {
        let json = serde_json::to_value(ExtensionStatus::Error("boom".into())).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "error", "message": "boom" }));
        let json = serde_json::to_value(ExtensionStatus::Active).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "active" }));
    }
}
