use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::Path;

use tracing::debug;
use warden_types::{ExtensionManifest, ExtensionVersion, Integrity};

use crate::error::{Result, StoreError};

const MANIFEST_FILE: &str = "manifest.json";
const README_FILE: &str = "README.md";
const CHANGELOG_FILE: &str = "CHANGELOG.md";

/// Largest uncompressed size accepted for a single bundle entry.
pub const MAX_ENTRY_SIZE: u64 = 32 * 1024 * 1024;

/// A parsed extension bundle: manifest, payload and optional documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionPackage {
    pub manifest: ExtensionManifest,
    pub payload: Vec<u8>,
    pub readme: Option<String>,
    pub changelog: Option<String>,
}

impl ExtensionPackage {
    /// Build a package from already extracted bundle entries.
    ///
    /// The bundle must contain `manifest.json` and exactly the payload file its
    /// kind calls for. `README.md` and `CHANGELOG.md` are optional; anything
    /// else is rejected.
    pub fn from_entries(mut entries: BTreeMap<String, Vec<u8>>) -> Result<Self> {
        let manifest_bytes = entries
            .remove(MANIFEST_FILE)
            .ok_or_else(|| StoreError::invalid_package("missing manifest.json"))?;
        let manifest = ExtensionManifest::from_json(&manifest_bytes)?;

        let payload_file = manifest.kind.payload_file();
        let payload = entries.remove(payload_file).ok_or_else(|| {
            StoreError::invalid_package(format!(
                "missing {payload_file} for {} extension",
                manifest.kind
            ))
        })?;

        let readme = take_text(&mut entries, README_FILE)?;
        let changelog = take_text(&mut entries, CHANGELOG_FILE)?;

        if let Some(unexpected) = entries.keys().next() {
            return Err(StoreError::invalid_package(format!(
                "unexpected entry {unexpected}"
            )));
        }

        Ok(Self {
            manifest,
            payload,
            readme,
            changelog,
        })
    }

    /// Parse a zip bundle held in memory. Entries larger than
    /// [`MAX_ENTRY_SIZE`] are rejected.
    pub fn from_zip_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_zip_bytes_limited(bytes, MAX_ENTRY_SIZE)
    }

    fn from_zip_bytes_limited(bytes: &[u8], max_entry_size: u64) -> Result<Self> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| StoreError::invalid_package(format!("failed to open zip: {e}")))?;

        let mut entries = BTreeMap::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).map_err(|e| {
                StoreError::invalid_package(format!("failed to read zip entry: {e}"))
            })?;
            if file.is_dir() {
                continue;
            }

            let name = file
                .enclosed_name()
                .and_then(|path| path.to_str().map(|s| s.replace('\\', "/")))
                .ok_or_else(|| {
                    StoreError::invalid_package(format!("unsafe entry path {}", file.name()))
                })?;

            // The declared size comes from the archive and is only a hint.
            if file.size() > max_entry_size {
                return Err(StoreError::invalid_package(format!(
                    "{name} exceeds the {max_entry_size} byte entry limit"
                )));
            }

            let mut content = Vec::new();
            (&mut file)
                .take(max_entry_size + 1)
                .read_to_end(&mut content)
                .map_err(|e| {
                    StoreError::invalid_package(format!("failed to read {name}: {e}"))
                })?;
            if content.len() as u64 > max_entry_size {
                return Err(StoreError::invalid_package(format!(
                    "{name} exceeds the {max_entry_size} byte entry limit"
                )));
            }

            if entries.insert(name.clone(), content).is_some() {
                return Err(StoreError::invalid_package(format!(
                    "duplicate entry {name}"
                )));
            }
        }

        debug!(entries = entries.len(), "Read extension bundle");
        Self::from_entries(entries)
    }

    /// Read and parse a zip bundle from disk.
    pub async fn from_zip_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| StoreError::IoOperation {
                operation: "read bundle".to_string(),
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_zip_bytes(&bytes)
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    /// Digest of the payload as it is now, in the manifest's algorithm.
    pub fn payload_integrity(&self) -> Integrity {
        Integrity::compute(self.manifest.integrity.algorithm, &self.payload)
    }

    /// Compare the payload digest with the one the manifest declares.
    pub fn verify_integrity(&self) -> Result<()> {
        if self.manifest.integrity.verify(&self.payload) {
            Ok(())
        } else {
            Err(StoreError::IntegrityMismatch {
                extension_id: self.manifest.id.clone(),
                expected: self.manifest.integrity.to_string(),
            })
        }
    }

    /// Release record for this package, dated now.
    pub fn release(&self) -> ExtensionVersion {
        let mut release = ExtensionVersion::from(&self.manifest);
        if let Some(changelog) = &self.changelog {
            release.changelog = changelog.clone();
        }
        release
    }
}

fn take_text(entries: &mut BTreeMap<String, Vec<u8>>, name: &str) -> Result<Option<String>> {
    entries
        .remove(name)
        .map(|bytes| {
            String::from_utf8(bytes)
                .map_err(|_| StoreError::invalid_package(format!("{name} is not valid UTF-8")))
        })
        .transpose()
}
