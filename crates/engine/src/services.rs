use std::sync::Arc;

use crate::clipboard::{Clipboard, MemoryClipboard};
use crate::events::{EventBus, HostEvent, Notification};
use crate::http::{HttpExecutor, ReqwestExecutor};
use crate::registry::{CommandRegistry, UiRegistry};

/// Registries, buses and host ports shared by every extension's gate.
///
/// Only the host holds this directly. Extensions reach it through their
/// [`CapabilityGate`](crate::gate::CapabilityGate).
#[derive(Clone)]
pub struct HostServices {
    pub commands: Arc<CommandRegistry>,
    pub ui: Arc<UiRegistry>,
    pub events: EventBus<HostEvent>,
    pub notifications: EventBus<Notification>,
    pub http: Arc<dyn HttpExecutor>,
    pub clipboard: Arc<dyn Clipboard>,
}

impl HostServices {
    pub fn new(http: Arc<dyn HttpExecutor>, clipboard: Arc<dyn Clipboard>) -> Self {
        Self {
            commands: Arc::new(CommandRegistry::new()),
            ui: Arc::new(UiRegistry::new()),
            events: EventBus::new(),
            notifications: EventBus::new(),
            http,
            clipboard,
        }
    }
}

impl Default for HostServices {
    fn default() -> Self {
        Self::new(
            Arc::new(ReqwestExecutor::new()),
            Arc::new(MemoryClipboard::new()),
        )
    }
}
