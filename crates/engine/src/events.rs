use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::disposable::Disposable;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct BusState<T> {
    listeners: Mutex<Vec<(u64, Listener<T>)>>,
    next_id: AtomicU64,
}

/// Synchronous broadcast channel.
///
/// `emit` calls the listeners subscribed at that moment, in subscription order.
/// There is no replay for late subscribers and no buffering. A panicking
/// listener is logged and skipped.
pub struct EventBus<T> {
    state: Arc<BusState<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(BusState {
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }
}

impl<T: 'static> EventBus<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Disposable {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        self.state
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));

        let state = Arc::downgrade(&self.state);
        Disposable::new(move || {
            if let Some(state) = state.upgrade() {
                state
                    .listeners
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|(listener_id, _)| *listener_id != id);
            }
        })
    }

    pub fn emit(&self, payload: &T) {
        // Snapshot so listeners may subscribe or dispose while being called.
        let listeners: Vec<Listener<T>> = self
            .state
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(payload))).is_err() {
                warn!("Event listener panicked");
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.state
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Event broadcast on the host bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostEvent {
    pub name: String,
    /// Emitting extension, `None` when the host itself emitted.
    pub source: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    #[default]
    Info,
    Warning,
    Error,
}

/// Notification an extension asked the host to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub extension_id: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub level: NotificationLevel,
}
