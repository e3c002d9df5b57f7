use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use crate::disposable::Disposable;
use crate::error::{Error, Result};

/// Callback behind a command id.
pub type CommandHandler = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

struct Registration {
    token: u64,
    owner: Option<String>,
    handler: CommandHandler,
}

/// Maps command ids to callbacks.
///
/// At most one registration is live per id; registering an id again replaces
/// the previous callback. Disposing a replaced registration leaves the newer
/// one in place.
#[derive(Default)]
pub struct CommandRegistry {
    commands: DashMap<String, Registration>,
    next_token: AtomicU64,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async callback under `id`. `owner` is the extension that
    /// registered it, or `None` for host commands.
    pub fn register_command<F, Fut>(
        self: &Arc<Self>,
        id: &str,
        owner: Option<&str>,
        handler: F,
    ) -> Disposable
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register_handler(id, owner, Arc::new(move |args| handler(args).boxed()))
    }

    pub fn register_handler(
        self: &Arc<Self>,
        id: &str,
        owner: Option<&str>,
        handler: CommandHandler,
    ) -> Disposable {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let previous = self.commands.insert(
            id.to_string(),
            Registration {
                token,
                owner: owner.map(str::to_string),
                handler,
            },
        );

        if let Some(previous) = previous {
            debug!(
                command = id,
                previous_owner = previous.owner.as_deref().unwrap_or("host"),
                "Command registration replaced"
            );
        }

        let registry = Arc::downgrade(self);
        let id = id.to_string();
        Disposable::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry
                    .commands
                    .remove_if(&id, |_, registration| registration.token == token);
            }
        })
    }

    /// Run the callback registered under `id`.
    ///
    /// A callback that returns an error or panics surfaces as
    /// [`Error::CommandFailed`].
    pub async fn execute_command(&self, id: &str, args: Vec<Value>) -> Result<Value> {
        let handler = self
            .commands
            .get(id)
            .map(|registration| registration.handler.clone())
            .ok_or_else(|| Error::CommandNotFound(id.to_string()))?;

        match AssertUnwindSafe(handler(args)).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::CommandFailed {
                command: id.to_string(),
                message: e.to_string(),
            }),
            Err(panic) => {
                let message = panic_message(&*panic);
                warn!(command = id, %message, "Command handler panicked");
                Err(Error::CommandFailed {
                    command: id.to_string(),
                    message,
                })
            }
        }
    }

    /// Registered command ids, sorted.
    pub fn commands(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.commands.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn has_command(&self, id: &str) -> bool {
        self.commands.contains_key(id)
    }

    /// Extension that owns the live registration, `None` for host commands or
    /// unknown ids.
    pub fn owner(&self, id: &str) -> Option<String> {
        self.commands
            .get(id)
            .and_then(|registration| registration.owner.clone())
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
