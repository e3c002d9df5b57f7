//! Extension runtime for Warden.
//!
//! This crate loads extension packages into a sandbox, hands each one a
//! capability gate as its only route to host services, and tears everything
//! the extension registered down again when it is unloaded.

pub mod clipboard;
pub mod config;
pub mod context;
pub mod disposable;
pub mod error;
pub mod events;
pub mod gate;
pub mod host;
pub mod http;
pub mod loader;
pub mod registry;
pub mod sandbox;
pub mod services;

pub use clipboard::{Clipboard, MemoryClipboard};
pub use config::HostConfig;
pub use context::ExtensionContext;
pub use disposable::{Disposable, SubscriptionList};
pub use error::{Error, Result};
pub use events::{EventBus, HostEvent, Notification, NotificationLevel};
pub use gate::CapabilityGate;
pub use host::{ExtensionHost, ExtensionHostBuilder};
pub use http::{HttpExecutor, ReqwestExecutor, Request, Response};
pub use loader::{ExtensionLoader, ExtensionStatus, LoadedExtension};
pub use registry::{CommandRegistry, UiComponent, UiContribution, UiRegistry};
pub use sandbox::{ExtensionModule, FnModule, ModuleExports, SandboxHost, StaticSandbox};
pub use services::HostServices;
