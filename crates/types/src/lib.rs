//! Shared data model for the Warden extension host.
//!
//! These types are the vocabulary every other crate speaks: extension manifests,
//! the closed set of host capabilities, payload integrity digests and the
//! release records consulted when deciding whether a version may be installed.

pub mod capability;
pub mod integrity;
pub mod manifest;
pub mod version;

pub use capability::{Capability, CapabilityParseError, UiSlot};
pub use integrity::{Integrity, IntegrityAlgorithm, IntegrityParseError};
pub use manifest::{
    CommandContribution, Contributions, ExtensionKind, ExtensionManifest, ManifestError,
    ViewContribution,
};
pub use version::ExtensionVersion;
