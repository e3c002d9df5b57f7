use std::fmt;
use std::sync::Arc;

use warden_storage::ScopedStorage;
use warden_types::ExtensionManifest;

use crate::disposable::{Disposable, SubscriptionList};
use crate::gate::CapabilityGate;

/// Everything an extension receives when it is activated.
///
/// The context is cheap to clone; clones share the subscription list and the
/// gate. Once the extension is unloaded the subscription list is closed and
/// the gate refuses further calls.
#[derive(Clone)]
pub struct ExtensionContext {
    extension_id: String,
    manifest: Arc<ExtensionManifest>,
    subscriptions: SubscriptionList,
    workspace_state: ScopedStorage,
    global_state: ScopedStorage,
    api: CapabilityGate,
}

impl ExtensionContext {
    pub(crate) fn new(
        api: CapabilityGate,
        manifest: Arc<ExtensionManifest>,
        subscriptions: SubscriptionList,
        workspace_state: ScopedStorage,
        global_state: ScopedStorage,
    ) -> Self {
        Self {
            extension_id: api.extension_id().to_string(),
            manifest,
            subscriptions,
            workspace_state,
            global_state,
            api,
        }
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// The manifest this instance was loaded from.
    pub fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    /// Disposables released when the extension is unloaded, in this order.
    pub(crate) fn subscriptions(&self) -> &SubscriptionList {
        &self.subscriptions
    }

    /// Number of disposables currently tracked for this extension.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Track a disposable the extension created itself.
    pub fn push_subscription(&self, disposable: Disposable) -> bool {
        self.subscriptions.push(disposable)
    }

    /// State tied to the current workspace.
    pub fn workspace_state(&self) -> &ScopedStorage {
        &self.workspace_state
    }

    /// State shared across workspaces.
    pub fn global_state(&self) -> &ScopedStorage {
        &self.global_state
    }

    /// The capability gate bound to this extension.
    pub fn api(&self) -> &CapabilityGate {
        &self.api
    }
}

impl fmt::Debug for ExtensionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionContext")
            .field("extension_id", &self.extension_id)
            .field("version", &self.manifest.version)
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}
