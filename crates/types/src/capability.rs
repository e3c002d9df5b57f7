use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A host-defined privilege an extension must be granted before use.
///
/// The string form (`commands.register`, `ui.sidebar`, ...) is what manifests
/// declare and what the permission store persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    CommandsRegister,
    CommandsExecute,
    UiSidebar,
    UiPanel,
    UiToolbar,
    UiModal,
    UiStatusBar,
    UiNotifications,
    NetworkHttp,
    ClipboardRead,
    ClipboardWrite,
    EventsEmit,
    EventsSubscribe,
}

impl Capability {
    pub const ALL: [Capability; 13] = [
        Capability::CommandsRegister,
        Capability::CommandsExecute,
        Capability::UiSidebar,
        Capability::UiPanel,
        Capability::UiToolbar,
        Capability::UiModal,
        Capability::UiStatusBar,
        Capability::UiNotifications,
        Capability::NetworkHttp,
        Capability::ClipboardRead,
        Capability::ClipboardWrite,
        Capability::EventsEmit,
        Capability::EventsSubscribe,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::CommandsRegister => "commands.register",
            Capability::CommandsExecute => "commands.execute",
            Capability::UiSidebar => "ui.sidebar",
            Capability::UiPanel => "ui.panel",
            Capability::UiToolbar => "ui.toolbar",
            Capability::UiModal => "ui.modal",
            Capability::UiStatusBar => "ui.statusbar",
            Capability::UiNotifications => "ui.notifications",
            Capability::NetworkHttp => "network.http",
            Capability::ClipboardRead => "clipboard.read",
            Capability::ClipboardWrite => "clipboard.write",
            Capability::EventsEmit => "events.emit",
            Capability::EventsSubscribe => "events.subscribe",
        }
    }

    /// User-facing short description, shown next to permission prompts.
    pub fn description(self) -> &'static str {
        match self {
            Capability::CommandsRegister => "Register commands in the command palette",
            Capability::CommandsExecute => "Run commands contributed by the host or other extensions",
            Capability::UiSidebar => "Add views to the sidebar",
            Capability::UiPanel => "Add panels to the workspace",
            Capability::UiToolbar => "Add items to the toolbar",
            Capability::UiModal => "Open modal dialogs",
            Capability::UiStatusBar => "Add items to the status bar",
            Capability::UiNotifications => "Show notifications",
            Capability::NetworkHttp => "Make outbound network requests",
            Capability::ClipboardRead => "Read the clipboard",
            Capability::ClipboardWrite => "Write to the clipboard",
            Capability::EventsEmit => "Broadcast events to the host",
            Capability::EventsSubscribe => "Listen to host events",
        }
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityParseError {
    #[error("capability must not be empty")]
    Empty,

    #[error("unsupported capability: {0}")]
    Unsupported(String),

    #[error("unsupported UI slot: {0}")]
    UnsupportedSlot(String),
}

impl FromStr for Capability {
    type Err = CapabilityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        if value.is_empty() {
            return Err(CapabilityParseError::Empty);
        }

        Capability::ALL
            .into_iter()
            .find(|capability| capability.as_str() == value)
            .ok_or_else(|| CapabilityParseError::Unsupported(value.to_string()))
    }
}

impl Serialize for Capability {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Host UI locations an extension can contribute to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiSlot {
    Sidebar,
    Panel,
    Toolbar,
    Modal,
    #[serde(rename = "statusbar")]
    StatusBar,
}

impl UiSlot {
    /// Fixed slot to capability table; every slot is gated by its own capability.
    pub fn required_capability(self) -> Capability {
        match self {
            UiSlot::Sidebar => Capability::UiSidebar,
            UiSlot::Panel => Capability::UiPanel,
            UiSlot::Toolbar => Capability::UiToolbar,
            UiSlot::Modal => Capability::UiModal,
            UiSlot::StatusBar => Capability::UiStatusBar,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UiSlot::Sidebar => "sidebar",
            UiSlot::Panel => "panel",
            UiSlot::Toolbar => "toolbar",
            UiSlot::Modal => "modal",
            UiSlot::StatusBar => "statusbar",
        }
    }
}

impl Display for UiSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UiSlot {
    type Err = CapabilityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "sidebar" => Ok(UiSlot::Sidebar),
            "panel" => Ok(UiSlot::Panel),
            "toolbar" => Ok(UiSlot::Toolbar),
            "modal" => Ok(UiSlot::Modal),
            "statusbar" => Ok(UiSlot::StatusBar),
            other => Err(CapabilityParseError::UnsupportedSlot(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn parses_every_capability_from_its_string_id() {
        for capability in Capability::ALL {
            assert_eq!(capability.as_str().parse::<Capability>(), Ok(capability));
        }
    }

    #[test]
    fn rejects_unknown_and_empty_capabilities() {
        assert_eq!("  ".parse::<Capability>(), Err(CapabilityParseError::Empty));
        assert_eq!(
            "filesystem.write".parse::<Capability>(),
            Err(CapabilityParseError::Unsupported("filesystem.write".to_string()))
        );
        assert!("Network.Http".parse::<Capability>().is_err());
    }

    #[test]
    fn every_slot_maps_to_a_distinct_ui_capability() {
        let slots = [
            UiSlot::Sidebar,
            UiSlot::Panel,
            UiSlot::Toolbar,
            UiSlot::Modal,
            UiSlot::StatusBar,
        ];
        let capabilities: HashSet<_> = slots.iter().map(|s| s.required_capability()).collect();
        assert_eq!(capabilities.len(), slots.len());
        assert!(capabilities.iter().all(|c| c.as_str().starts_with("ui.")));
    }

    #[test]
    fn capability_serializes_as_its_string_id() {
        let json = serde_json::to_string(&Capability::NetworkHttp).unwrap();
        assert_eq!(json, "\"network.http\"");

        let parsed: Capability = serde_json::from_str("\"clipboard.read\"").unwrap();
        assert_eq!(parsed, Capability::ClipboardRead);

        assert!(serde_json::from_str::<Capability>("\"camera\"").is_err());
    }

    #[test]
    fn slot_round_trips_through_serde_and_from_str() {
        let slot: UiSlot = serde_json::from_str("\"statusbar\"").unwrap();
        assert_eq!(slot, UiSlot::StatusBar);
        assert_eq!("panel".parse::<UiSlot>(), Ok(UiSlot::Panel));
        assert!("main".parse::<UiSlot>().is_err());
    }
}
