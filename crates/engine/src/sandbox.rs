use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use futures::future::BoxFuture;
use tracing::debug;
use warden_types::ExtensionManifest;

use crate::context::ExtensionContext;
use crate::error::{Error, Result};

/// Entry points a module exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleExports {
    pub activate: bool,
    pub deactivate: bool,
}

impl Default for ModuleExports {
    fn default() -> Self {
        Self {
            activate: true,
            deactivate: true,
        }
    }
}

/// An instantiated extension payload.
#[async_trait]
pub trait ExtensionModule: Send + Sync {
    /// Entry points this module actually provides. The loader rejects a
    /// module without `activate`, and skips `deactivate` when absent.
    fn exports(&self) -> ModuleExports {
        ModuleExports::default()
    }

    async fn activate(&self, context: &ExtensionContext) -> Result<()>;

    async fn deactivate(&self) -> Result<()> {
        Ok(())
    }
}

/// Isolation boundary that turns a verified payload into a module.
///
/// Implementations decide how the payload is executed. The loader only calls
/// `instantiate` after the payload digest has been checked.
#[async_trait]
pub trait SandboxHost: Send + Sync {
    async fn instantiate(
        &self,
        manifest: &ExtensionManifest,
        payload: &[u8],
    ) -> Result<Arc<dyn ExtensionModule>>;

    async fn teardown(&self, extension_id: &str) -> Result<()>;
}

/// Sandbox for first-party modules compiled into the host, keyed by
/// extension id. The payload is verified but otherwise ignored.
#[derive(Default)]
pub struct StaticSandbox {
    modules: DashMap<String, Arc<dyn ExtensionModule>>,
    instantiated: DashSet<String>,
}

impl StaticSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, extension_id: impl Into<String>, module: Arc<dyn ExtensionModule>) {
        self.modules.insert(extension_id.into(), module);
    }

    pub fn with_module(self, extension_id: impl Into<String>, module: Arc<dyn ExtensionModule>) -> Self {
        self.register(extension_id, module);
        self
    }

    pub fn is_instantiated(&self, extension_id: &str) -> bool {
        self.instantiated.contains(extension_id)
    }
}

#[async_trait]
impl SandboxHost for StaticSandbox {
    async fn instantiate(
        &self,
        manifest: &ExtensionManifest,
        _payload: &[u8],
    ) -> Result<Arc<dyn ExtensionModule>> {
        let module = self
            .modules
            .get(&manifest.id)
            .map(|module| module.value().clone())
            .ok_or_else(|| Error::sandbox(&manifest.id, "no compiled-in module for this id"))?;

        self.instantiated.insert(manifest.id.clone());
        debug!(extension_id = %manifest.id, kind = %manifest.kind, "Instantiated static module");
        Ok(module)
    }

    async fn teardown(&self, extension_id: &str) -> Result<()> {
        self.instantiated.remove(extension_id);
        Ok(())
    }
}

type ActivateFn = dyn Fn(ExtensionContext) -> BoxFuture<'static, Result<()>> + Send + Sync;
type DeactivateFn = dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync;

/// Module assembled from closures.
///
/// ```ignore
/// let module = FnModule::new(|ctx| async move {
///     ctx.api().register_command("hello.say", |_| async { Ok(Value::Null) }).await?;
///     Ok(())
/// }.boxed());
/// ```
pub struct FnModule {
    activate: Box<ActivateFn>,
    deactivate: Option<Box<DeactivateFn>>,
}

impl FnModule {
    pub fn new<F>(activate: F) -> Self
    where
        F: Fn(ExtensionContext) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        Self {
            activate: Box::new(activate),
            deactivate: None,
        }
    }

    pub fn with_deactivate<F>(mut self, deactivate: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.deactivate = Some(Box::new(deactivate));
        self
    }
}

#[async_trait]
impl ExtensionModule for FnModule {
    fn exports(&self) -> ModuleExports {
        ModuleExports {
            activate: true,
            deactivate: self.deactivate.is_some(),
        }
    }

    async fn activate(&self, context: &ExtensionContext) -> Result<()> {
        (self.activate)(context.clone()).await
    }

    async fn deactivate(&self) -> Result<()> {
        match &self.deactivate {
            Some(deactivate) => deactivate().await,
            None => Ok(()),
        }
    }
}
