#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use semver::Version;
use serde_json::{Value, json};
use warden_engine::{
    Disposable, Error, ExtensionContext, ExtensionHost, ExtensionModule, ModuleExports, Result,
    StaticSandbox,
};
use warden_storage::StoragePort;
use warden_store::{AllowAll, ExtensionPackage, PermissionPrompt};
use warden_types::Integrity;

pub const HOST_VERSION: Version = Version::new(3, 0, 0);

/// Shared, ordered record of what scripted modules did.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Behavior {
    Normal,
    FailActivate,
    PanicActivate,
    FailDeactivate,
    MissingActivate,
    TryClipboard,
}

/// Module whose activation registers its commands, interleaved with
/// journaling disposables, then behaves as scripted.
pub struct ScriptedModule {
    journal: Journal,
    commands: Vec<String>,
    behavior: Behavior,
}

impl ScriptedModule {
    pub fn new(journal: &Journal, commands: &[&str], behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            journal: journal.clone(),
            commands: commands.iter().map(|c| c.to_string()).collect(),
            behavior,
        })
    }
}

#[async_trait]
impl ExtensionModule for ScriptedModule {
    fn exports(&self) -> ModuleExports {
        ModuleExports {
            activate: self.behavior != Behavior::MissingActivate,
            deactivate: true,
        }
    }

    async fn activate(&self, context: &ExtensionContext) -> Result<()> {
        self.journal.push("activate");

        for (index, command) in self.commands.iter().enumerate() {
            let reply = command.clone();
            context
                .api()
                .register_command(command, move |_| {
                    let reply = reply.clone();
                    async move { Ok(Value::String(reply)) }
                })
                .await?;

            let journal = self.journal.clone();
            context.push_subscription(Disposable::new(move || {
                journal.push(format!("dispose:{index}"))
            }));
        }

        match self.behavior {
            Behavior::FailActivate => Err(Error::sandbox(context.extension_id(), "activation refused")),
            Behavior::PanicActivate => panic!("activation exploded"),
            Behavior::TryClipboard => {
                match context.api().write_clipboard("secret").await {
                    Err(e) if e.is_permission_denied() => self.journal.push("clipboard:denied"),
                    Err(e) => return Err(e),
                    Ok(()) => self.journal.push("clipboard:written"),
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn deactivate(&self) -> Result<()> {
        self.journal.push("deactivate");
        if self.behavior == Behavior::FailDeactivate {
            return Err(Error::sandbox("scripted", "deactivate refused"));
        }
        Ok(())
    }
}

pub fn package(id: &str, version: &str) -> ExtensionPackage {
    package_with(id, version, json!({}))
}

/// Background package with `payload` digest in its manifest. Fields in
/// `overrides` are merged into the manifest.
pub fn package_with(id: &str, version: &str, overrides: Value) -> ExtensionPackage {
    let payload = format!("// {id} {version}").into_bytes();

    let mut manifest = json!({
        "id": id,
        "name": format!("{id} extension"),
        "version": version,
        "kind": "background",
        "permissions": ["commands.register"],
        "icon": "E",
        "integrity": Integrity::sha256(&payload).to_string(),
    });
    if let (Some(manifest), Some(overrides)) = (manifest.as_object_mut(), overrides.as_object()) {
        for (key, value) in overrides {
            manifest.insert(key.clone(), value.clone());
        }
    }

    let mut entries = BTreeMap::new();
    entries.insert(
        "manifest.json".to_string(),
        serde_json::to_vec(&manifest).unwrap(),
    );
    entries.insert("index.js".to_string(), payload);
    ExtensionPackage::from_entries(entries).unwrap()
}

pub async fn host(
    sandbox: Arc<StaticSandbox>,
    storage: Arc<dyn StoragePort>,
    prompt: Arc<dyn PermissionPrompt>,
) -> ExtensionHost {
    ExtensionHost::builder(HOST_VERSION)
        .sandbox(sandbox)
        .storage(storage)
        .prompt(prompt)
        .build()
        .await
}

pub async fn allow_all_host(sandbox: Arc<StaticSandbox>) -> ExtensionHost {
    host(
        sandbox,
        Arc::new(warden_storage::MemoryStorage::new()),
        Arc::new(AllowAll),
    )
    .await
}
