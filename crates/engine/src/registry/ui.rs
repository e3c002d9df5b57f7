use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use warden_types::UiSlot;

use crate::disposable::Disposable;
use crate::events::EventBus;

/// What an extension asks to place in a host UI slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiComponent {
    pub id: String,
    pub slot: UiSlot,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Lower values render first within a slot.
    #[serde(default)]
    pub order: i32,
    /// Markup or entry point the host renders for this component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl UiComponent {
    pub fn new(id: impl Into<String>, slot: UiSlot, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            slot,
            title: title.into(),
            icon: None,
            order: 0,
            content: None,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

/// A registered component together with the extension that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiContribution {
    pub extension_id: String,
    #[serde(flatten)]
    pub component: UiComponent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiChange {
    Registered { id: String, slot: UiSlot },
    Removed { id: String, slot: UiSlot },
}

struct Entry {
    token: u64,
    contribution: UiContribution,
}

/// Components contributed to host UI slots, keyed by component id.
///
/// Same replacement rules as the command registry: the last registration of an
/// id wins and disposing a replaced one is a no-op.
#[derive(Default)]
pub struct UiRegistry {
    components: DashMap<String, Entry>,
    next_token: AtomicU64,
    changes: EventBus<UiChange>,
}

impl UiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_ui_component(self: &Arc<Self>, contribution: UiContribution) -> Disposable {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let id = contribution.component.id.clone();
        let slot = contribution.component.slot;

        if let Some(previous) = self.components.insert(
            id.clone(),
            Entry {
                token,
                contribution,
            },
        ) {
            debug!(
                component = %id,
                previous_owner = %previous.contribution.extension_id,
                "UI component replaced"
            );
        }
        self.changes.emit(&UiChange::Registered {
            id: id.clone(),
            slot,
        });

        let registry = Arc::downgrade(self);
        Disposable::new(move || {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            if let Some((_, entry)) = registry
                .components
                .remove_if(&id, |_, entry| entry.token == token)
            {
                registry.changes.emit(&UiChange::Removed {
                    id,
                    slot: entry.contribution.component.slot,
                });
            }
        })
    }

    /// Components in `slot`, ordered by `order` then id.
    pub fn components_for_slot(&self, slot: UiSlot) -> Vec<UiContribution> {
        let mut components: Vec<UiContribution> = self
            .components
            .iter()
            .filter(|entry| entry.contribution.component.slot == slot)
            .map(|entry| entry.contribution.clone())
            .collect();
        components.sort_by(|a, b| {
            a.component
                .order
                .cmp(&b.component.order)
                .then_with(|| a.component.id.cmp(&b.component.id))
        });
        components
    }

    pub fn components_for_extension(&self, extension_id: &str) -> Vec<UiContribution> {
        let mut components: Vec<UiContribution> = self
            .components
            .iter()
            .filter(|entry| entry.contribution.extension_id == extension_id)
            .map(|entry| entry.contribution.clone())
            .collect();
        components.sort_by(|a, b| a.component.id.cmp(&b.component.id));
        components
    }

    pub fn component(&self, id: &str) -> Option<UiContribution> {
        self.components
            .get(id)
            .map(|entry| entry.contribution.clone())
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Notified after every registration and removal.
    pub fn changes(&self) -> &EventBus<UiChange> {
        &self.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn contribution(extension_id: &str, id: &str, slot: UiSlot, order: i32) -> UiContribution {
        UiContribution {
            extension_id: extension_id.to_string(),
            component: UiComponent::new(id, slot, id).with_order(order),
        }
    }

    #[test]
    fn queries_by_slot_and_extension() {
        let registry = Arc::new(UiRegistry::new());
        let _a = registry.register_ui_component(contribution("lab", "lab.side", UiSlot::Sidebar, 2));
        let _b = registry.register_ui_component(contribution("qc", "qc.side", UiSlot::Sidebar, 1));
        let _c = registry.register_ui_component(contribution("lab", "lab.status", UiSlot::StatusBar, 0));

        let sidebar: Vec<String> = registry
            .components_for_slot(UiSlot::Sidebar)
            .into_iter()
            .map(|c| c.component.id)
            .collect();
        assert_eq!(sidebar, vec!["qc.side", "lab.side"]);

        let lab: Vec<String> = registry
            .components_for_extension("lab")
            .into_iter()
            .map(|c| c.component.id)
            .collect();
        assert_eq!(lab, vec!["lab.side", "lab.status"]);
        assert!(registry.components_for_slot(UiSlot::Modal).is_empty());
    }

    #[test]
    fn replaced_registration_survives_disposal_of_the_old_token() {
        let registry = Arc::new(UiRegistry::new());
        let old = registry.register_ui_component(contribution("lab", "panel", UiSlot::Panel, 0));
        let new = registry.register_ui_component(contribution("qc", "panel", UiSlot::Panel, 0));

        old.dispose();
        assert_eq!(registry.component("panel").unwrap().extension_id, "qc");

        new.dispose();
        assert!(registry.is_empty());
    }

    #[test]
    fn change_notifications_follow_registrations() {
        let registry = Arc::new(UiRegistry::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _listener = {
            let seen = seen.clone();
            registry
                .changes()
                .subscribe(move |change| seen.lock().unwrap().push(change.clone()))
        };

        let disposable = registry.register_ui_component(contribution("lab", "tb", UiSlot::Toolbar, 0));
        disposable.dispose();
        disposable.dispose();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                UiChange::Registered {
                    id: "tb".to_string(),
                    slot: UiSlot::Toolbar
                },
                UiChange::Removed {
                    id: "tb".to_string(),
                    slot: UiSlot::Toolbar
                },
            ]
        );
    }

    #[test]
    fn contribution_serializes_flat() {
        let json = serde_json::to_value(contribution("lab", "lab.side", UiSlot::Sidebar, 0)).unwrap();
        assert_eq!(json["extensionId"], "lab");
        assert_eq!(json["slot"], "sidebar");
        assert_eq!(json["id"], "lab.side");
    }
}
