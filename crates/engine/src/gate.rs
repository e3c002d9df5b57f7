use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use warden_store::PermissionStore;
use warden_types::Capability;

use crate::disposable::{Disposable, SubscriptionList};
use crate::error::{Error, Result};
use crate::events::{HostEvent, Notification, NotificationLevel};
use crate::http::{EXTENSION_ID_HEADER, Request, Response};
use crate::registry::{UiComponent, UiContribution};
use crate::services::HostServices;

struct GateInner {
    extension_id: String,
    permissions: PermissionStore,
    services: HostServices,
    subscriptions: SubscriptionList,
}

/// The only path from extension code to host capabilities.
///
/// One gate exists per loaded extension. Every operation first checks the
/// capability it needs, prompting through the permission store when no
/// decision exists, and fails with [`Error::PermissionDenied`] otherwise.
/// Declared manifest permissions play no part in this check.
///
/// Everything the gate registers is enrolled in the extension's subscription
/// list, and the owning extension id is stamped onto UI contributions,
/// notifications, events and outbound requests.
#[derive(Clone)]
pub struct CapabilityGate {
    inner: Arc<GateInner>,
}

impl CapabilityGate {
    pub(crate) fn new(
        extension_id: impl Into<String>,
        permissions: PermissionStore,
        services: HostServices,
        subscriptions: SubscriptionList,
    ) -> Self {
        Self {
            inner: Arc::new(GateInner {
                extension_id: extension_id.into(),
                permissions,
                services,
                subscriptions,
            }),
        }
    }

    pub fn extension_id(&self) -> &str {
        &self.inner.extension_id
    }

    pub async fn check_permission(&self, capability: Capability) -> Result<()> {
        self.check_permission_with_reason(capability, None).await
    }

    /// Same as [`check_permission`](Self::check_permission), with a reason
    /// shown to the user if a prompt is needed.
    pub async fn check_permission_with_reason(
        &self,
        capability: Capability,
        reason: Option<&str>,
    ) -> Result<()> {
        self.ensure_live()?;

        let extension_id = self.extension_id();
        if self
            .inner
            .permissions
            .request_permission(extension_id, capability, reason)
            .await
        {
            Ok(())
        } else {
            warn!(extension_id, %capability, "Capability denied");
            Err(Error::PermissionDenied {
                extension_id: extension_id.to_string(),
                capability,
            })
        }
    }

    pub async fn register_command<F, Fut>(&self, id: &str, handler: F) -> Result<Disposable>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.check_permission(Capability::CommandsRegister).await?;

        let disposable =
            self.inner
                .services
                .commands
                .register_command(id, Some(self.extension_id()), handler);
        debug!(extension_id = self.extension_id(), command = id, "Registered command");
        self.enroll(disposable)
    }

    pub async fn execute_command(&self, id: &str, args: Vec<Value>) -> Result<Value> {
        self.check_permission(Capability::CommandsExecute).await?;
        self.inner.services.commands.execute_command(id, args).await
    }

    /// Place a component in a UI slot. The capability checked depends on the
    /// slot.
    pub async fn register_ui_component(&self, component: UiComponent) -> Result<Disposable> {
        self.check_permission(component.slot.required_capability())
            .await?;

        let contribution = UiContribution {
            extension_id: self.extension_id().to_string(),
            component,
        };
        let disposable = self.inner.services.ui.register_ui_component(contribution);
        self.enroll(disposable)
    }

    /// Send an HTTP request. The `X-Extension-Id` header is always set to
    /// this extension, replacing any value the caller supplied.
    pub async fn fetch(&self, mut request: Request) -> Result<Response> {
        self.check_permission(Capability::NetworkHttp).await?;

        request.set_header(EXTENSION_ID_HEADER, self.extension_id());
        debug!(
            extension_id = self.extension_id(),
            method = %request.method,
            url = %request.url,
            "Executing HTTP request"
        );
        Ok(self.inner.services.http.execute(request).await?)
    }

    pub async fn read_clipboard(&self) -> Result<String> {
        self.check_permission(Capability::ClipboardRead).await?;
        self.inner.services.clipboard.read_text().await
    }

    pub async fn write_clipboard(&self, text: &str) -> Result<()> {
        self.check_permission(Capability::ClipboardWrite).await?;
        self.inner.services.clipboard.write_text(text).await
    }

    pub async fn show_notification(
        &self,
        title: &str,
        message: &str,
        level: NotificationLevel,
    ) -> Result<()> {
        self.check_permission(Capability::UiNotifications).await?;

        self.inner.services.notifications.emit(&Notification {
            extension_id: self.extension_id().to_string(),
            title: title.to_string(),
            message: message.to_string(),
            level,
        });
        Ok(())
    }

    /// Broadcast an event on the host bus, with this extension as its source.
    pub async fn emit_event(&self, name: &str, payload: Value) -> Result<()> {
        self.check_permission(Capability::EventsEmit).await?;

        self.inner.services.events.emit(&HostEvent {
            name: name.to_string(),
            source: Some(self.extension_id().to_string()),
            payload,
        });
        Ok(())
    }

    /// Listen to host bus events named `name`.
    pub async fn on_event<F>(&self, name: &str, listener: F) -> Result<Disposable>
    where
        F: Fn(&HostEvent) + Send + Sync + 'static,
    {
        self.check_permission(Capability::EventsSubscribe).await?;

        let name = name.to_string();
        let disposable = self.inner.services.events.subscribe(move |event| {
            if event.name == name {
                listener(event);
            }
        });
        self.enroll(disposable)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.subscriptions.is_closed() {
            Err(Error::NotLoaded(self.extension_id().to_string()))
        } else {
            Ok(())
        }
    }

    /// Track `disposable` for release at unload. If the extension was unloaded
    /// in the meantime the registration is released right away.
    fn enroll(&self, disposable: Disposable) -> Result<Disposable> {
        if self.inner.subscriptions.push(disposable.clone()) {
            Ok(disposable)
        } else {
            Err(Error::NotLoaded(self.extension_id().to_string()))
        }
    }
}

impl fmt::Debug for CapabilityGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityGate")
            .field("extension_id", &self.inner.extension_id)
            .finish_non_exhaustive()
    }
}
