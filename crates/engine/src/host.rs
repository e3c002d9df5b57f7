use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use semver::Version;
use serde_json::Value;
use tracing::{error, info, warn};
use warden_storage::{FilesystemStorage, MemoryStorage, StoragePort};
use warden_store::{
    DEFAULT_PROMPT_TIMEOUT, DenyAll, ExtensionPackage, PermissionPrompt, PermissionStore,
    VersionManager,
};
use warden_types::ExtensionVersion;

use crate::clipboard::{Clipboard, MemoryClipboard};
use crate::config::HostConfig;
use crate::error::{Error, Result};
use crate::events::HostEvent;
use crate::http::{HttpExecutor, ReqwestExecutor};
use crate::loader::{ExtensionLoader, ExtensionStatus};
use crate::sandbox::{SandboxHost, StaticSandbox};
use crate::services::HostServices;

struct HostInner {
    loader: ExtensionLoader,
    versions: VersionManager,
}

/// Entry point for embedding the extension runtime.
///
/// Wires the loader, permission store, version manager and shared services
/// together and runs the install and update flows on top of them. Every
/// mutating flow runs in a spawned task holding the extension's operation
/// lock, so dropping the caller never leaves a flow half applied.
#[derive(Clone)]
pub struct ExtensionHost {
    inner: Arc<HostInner>,
}

pub struct ExtensionHostBuilder {
    host_version: Version,
    storage: Option<Arc<dyn StoragePort>>,
    sandbox: Option<Arc<dyn SandboxHost>>,
    prompt: Option<Arc<dyn PermissionPrompt>>,
    http: Option<Arc<dyn HttpExecutor>>,
    clipboard: Option<Arc<dyn Clipboard>>,
    prompt_timeout: Duration,
}

impl ExtensionHostBuilder {
    pub fn storage(mut self, storage: Arc<dyn StoragePort>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn sandbox(mut self, sandbox: Arc<dyn SandboxHost>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn prompt(mut self, prompt: Arc<dyn PermissionPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn http(mut self, http: Arc<dyn HttpExecutor>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn clipboard(mut self, clipboard: Arc<dyn Clipboard>) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    pub fn prompt_timeout(mut self, timeout: Duration) -> Self {
        self.prompt_timeout = timeout;
        self
    }

    /// Load persisted state and assemble the host. Unset ports fall back to
    /// in-memory storage, an empty static sandbox, a prompt that denies
    /// everything, reqwest and an in-memory clipboard.
    pub async fn build(self) -> ExtensionHost {
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let sandbox = self
            .sandbox
            .unwrap_or_else(|| Arc::new(StaticSandbox::new()));
        let prompt = self.prompt.unwrap_or_else(|| Arc::new(DenyAll));
        let http = self
            .http
            .unwrap_or_else(|| Arc::new(ReqwestExecutor::new()));
        let clipboard = self
            .clipboard
            .unwrap_or_else(|| Arc::new(MemoryClipboard::new()));

        let permissions = PermissionStore::load(storage.clone(), prompt, self.prompt_timeout).await;
        let versions = VersionManager::load(storage.clone(), self.host_version).await;
        let services = HostServices::new(http, clipboard);
        let loader = ExtensionLoader::new(sandbox, services, permissions, storage);

        info!(host_version = %versions.host_version(), "Extension host ready");
        ExtensionHost {
            inner: Arc::new(HostInner { loader, versions }),
        }
    }
}

impl ExtensionHost {
    pub fn builder(host_version: Version) -> ExtensionHostBuilder {
        ExtensionHostBuilder {
            host_version,
            storage: None,
            sandbox: None,
            prompt: None,
            http: None,
            clipboard: None,
            prompt_timeout: DEFAULT_PROMPT_TIMEOUT,
        }
    }

    /// Build a host that persists under `config.data_dir`.
    pub async fn from_config(
        config: &HostConfig,
        sandbox: Arc<dyn SandboxHost>,
        prompt: Arc<dyn PermissionPrompt>,
    ) -> Result<Self> {
        let storage = FilesystemStorage::new(&config.data_dir);
        storage.initialize().await?;

        Ok(Self::builder(config.host_semver()?)
            .storage(Arc::new(storage))
            .sandbox(sandbox)
            .prompt(prompt)
            .prompt_timeout(config.prompt_timeout())
            .build()
            .await)
    }

    pub fn loader(&self) -> &ExtensionLoader {
        &self.inner.loader
    }

    pub fn permissions(&self) -> &PermissionStore {
        self.inner.loader.permissions()
    }

    pub fn versions(&self) -> &VersionManager {
        &self.inner.versions
    }

    pub fn services(&self) -> &HostServices {
        self.inner.loader.services()
    }

    pub fn status(&self, extension_id: &str) -> ExtensionStatus {
        self.inner.loader.status(extension_id)
    }

    /// Install a package, replacing an older loaded version of it.
    ///
    /// Checks run in this order: payload integrity, manifest, host
    /// compatibility, then update eligibility. Nothing is loaded or recorded
    /// unless all of them pass.
    pub async fn install(&self, package: ExtensionPackage) -> Result<()> {
        let host = self.clone();
        detached(async move { host.install_flow(package, true).await }).await
    }

    /// Install a newer version of an extension that is already installed.
    pub async fn update(&self, package: ExtensionPackage) -> Result<()> {
        if self
            .inner
            .versions
            .get_installed_version(package.id())
            .await
            .is_none()
        {
            return Err(Error::NotInstalled(package.id().to_string()));
        }
        self.install(package).await
    }

    pub async fn check_for_updates(
        &self,
        extension_id: &str,
        available: &[ExtensionVersion],
    ) -> Option<ExtensionVersion> {
        self.inner
            .versions
            .check_for_updates(extension_id, available)
            .await
    }

    /// Load an older package and record it as installed.
    pub async fn rollback(&self, package: ExtensionPackage) -> Result<()> {
        let host = self.clone();
        detached(async move {
            let extension_id = package.id().to_string();
            let _guard = host.inner.loader.acquire(&extension_id).await;

            let previous = host
                .inner
                .versions
                .get_installed_version(&extension_id)
                .await
                .ok_or_else(|| Error::NotInstalled(extension_id.clone()))?;

            host.admit(&package, false).await?;
            host.replace_locked(&package).await?;
            host.inner
                .versions
                .rollback(&extension_id, package.version())
                .await?;
            host.inner.loader.mark_installed_locked(&extension_id, true)?;

            info!(%extension_id, from = %previous, to = package.version(), "Extension rolled back");
            Ok(())
        })
        .await
    }

    /// Unload an extension. Its grants and installed version are kept.
    pub async fn disable(&self, extension_id: &str) -> Result<()> {
        let host = self.clone();
        let extension_id = extension_id.to_string();
        detached(async move {
            let _guard = host.inner.loader.acquire(&extension_id).await;
            host.inner.loader.unload_locked(&extension_id).await?;
            info!(%extension_id, "Extension disabled");
            Ok(())
        })
        .await
    }

    /// Load a package that is already installed at this version.
    pub async fn enable(&self, package: ExtensionPackage) -> Result<()> {
        let host = self.clone();
        detached(async move {
            let extension_id = package.id().to_string();
            let _guard = host.inner.loader.acquire(&extension_id).await;

            let installed = host
                .inner
                .versions
                .get_installed_version(&extension_id)
                .await
                .ok_or_else(|| Error::NotInstalled(extension_id.clone()))?;
            if !same_version(&installed, package.version()) {
                return Err(Error::UpdateRejected {
                    extension_id,
                    version: package.version().to_string(),
                    reason: format!("Installed version is {installed}"),
                });
            }

            host.admit(&package, false).await?;
            host.inner
                .loader
                .load_locked(package.manifest.clone(), &package.payload)
                .await?;
            host.inner.loader.mark_installed_locked(&extension_id, true)?;

            info!(%extension_id, version = %installed, "Extension enabled");
            Ok(())
        })
        .await
    }

    /// Unload an extension and drop its installed version. Grants are kept
    /// so a reinstall does not prompt again.
    pub async fn uninstall(&self, extension_id: &str) -> Result<()> {
        let host = self.clone();
        let extension_id = extension_id.to_string();
        detached(async move {
            let _guard = host.inner.loader.acquire(&extension_id).await;

            let was_loaded = host.inner.loader.is_extension_loaded(&extension_id);
            if was_loaded {
                host.inner.loader.unload_locked(&extension_id).await?;
            }
            let had_version = host
                .inner
                .versions
                .remove_installed_version(&extension_id)
                .await?;

            if !was_loaded && !had_version {
                return Err(Error::NotInstalled(extension_id));
            }
            info!(%extension_id, "Extension uninstalled");
            Ok(())
        })
        .await
    }

    /// Run a command as the host. No capability check applies.
    pub async fn execute_command(&self, id: &str, args: Vec<Value>) -> Result<Value> {
        self.services().commands.execute_command(id, args).await
    }

    /// Broadcast an event with the host as its source.
    pub fn emit_event(&self, name: &str, payload: Value) {
        self.services().events.emit(&HostEvent {
            name: name.to_string(),
            source: None,
            payload,
        });
    }

    async fn install_flow(&self, package: ExtensionPackage, check_update: bool) -> Result<()> {
        let extension_id = package.id().to_string();
        let _guard = self.inner.loader.acquire(&extension_id).await;

        self.admit(&package, check_update).await?;
        self.replace_locked(&package).await?;
        self.inner
            .versions
            .set_installed_version(&extension_id, package.version())
            .await?;
        self.inner.loader.mark_installed_locked(&extension_id, true)?;

        info!(%extension_id, version = package.version(), "Extension installed");
        Ok(())
    }

    /// Checks that must pass before any extension code runs.
    async fn admit(&self, package: &ExtensionPackage, check_update: bool) -> Result<()> {
        let manifest = &package.manifest;

        if !manifest.integrity.verify(&package.payload) {
            let actual = package.payload_integrity().to_string();
            warn!(extension_id = %manifest.id, expected = %manifest.integrity, %actual, "Rejected package with bad payload digest");
            return Err(Error::PayloadIntegrityMismatch {
                extension_id: manifest.id.clone(),
                expected: manifest.integrity.to_string(),
                actual,
            });
        }

        manifest.validate()?;

        let compatibility = self.inner.versions.is_manifest_compatible(manifest);
        if !compatibility.compatible {
            return Err(Error::VersionIncompatible {
                extension_id: manifest.id.clone(),
                version: manifest.version.clone(),
                reason: compatibility.reason.unwrap_or_default(),
            });
        }

        if check_update {
            let check = self
                .inner
                .versions
                .can_update(&manifest.id, &manifest.version)
                .await;
            if !check.can_update {
                return Err(Error::UpdateRejected {
                    extension_id: manifest.id.clone(),
                    version: manifest.version.clone(),
                    reason: check.reason.unwrap_or_default(),
                });
            }
        }
        Ok(())
    }

    /// Swap the loaded instance for `package`. If the new version fails to
    /// load, the instance it replaced is loaded again so the running version
    /// keeps matching the installed record.
    async fn replace_locked(&self, package: &ExtensionPackage) -> Result<()> {
        let loader = &self.inner.loader;
        let extension_id = package.id();

        let previous = loader.source_locked(extension_id);
        if previous.is_some() {
            loader.unload_locked(extension_id).await?;
        }

        let Err(err) = loader
            .load_locked(package.manifest.clone(), &package.payload)
            .await
        else {
            return Ok(());
        };

        if let Some(previous) = previous {
            let version = previous.version().to_string();
            match loader.restore_locked(previous).await {
                Ok(()) => {
                    warn!(%extension_id, %version, error = %err, "Replacement failed, previous version restored")
                }
                Err(e) => {
                    error!(%extension_id, %version, error = %e, "Failed to restore previous version")
                }
            }
        }
        Err(err)
    }
}

fn same_version(a: &str, b: &str) -> bool {
    match (Version::parse(a.trim()), Version::parse(b.trim())) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.trim() == b.trim(),
    }
}

/// Run `flow` to completion on the runtime, whether or not the caller keeps
/// waiting for it.
async fn detached<T, F>(flow: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    tokio::spawn(flow)
        .await
        .map_err(|e| Error::TaskFailed(e.to_string()))?
}
