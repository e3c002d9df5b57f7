use std::path::Path;

use eyre::Result;
use warden_engine::HostConfig;
use warden_store::{ExtensionPackage, VersionManager};

use crate::cli::PackageCommands;
use crate::state::HostState;

pub async fn handle_package_command(cmd: PackageCommands, config: &HostConfig) -> Result<()> {
    match cmd {
        PackageCommands::Inspect { bundle, json } => handle_inspect(&bundle, json, config).await,
        PackageCommands::Verify { bundle } => handle_verify(&bundle).await,
    }
}

async fn handle_inspect(bundle: &Path, json: bool, config: &HostConfig) -> Result<()> {
    let package = ExtensionPackage::from_zip_file(bundle).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&package.manifest)?);
        return Ok(());
    }

    let state = HostState::open(config).await?;
    print_package(&package, &state.versions);
    Ok(())
}

async fn handle_verify(bundle: &Path) -> Result<()> {
    let package = ExtensionPackage::from_zip_file(bundle).await?;

    match package.verify_integrity() {
        Ok(()) => {
            println!(
                "✅ {} v{}: payload matches {}",
                package.id(),
                package.version(),
                package.manifest.integrity
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ {}", e);
            eprintln!("   actual digest: {}", package.payload_integrity());
            Err(e.into())
        }
    }
}

fn print_package(package: &ExtensionPackage, versions: &VersionManager) {
    let manifest = &package.manifest;

    println!("📦 {} v{}", manifest.name, manifest.version);
    println!("   ID: {}", manifest.id);
    println!("   Kind: {}", manifest.kind);
    if !manifest.author.is_empty() {
        println!("   Author: {}", manifest.author);
    }
    if !manifest.description.is_empty() {
        println!("   Description: {}", manifest.description);
    }

    if manifest.permissions.is_empty() {
        println!("   Permissions: (none declared)");
    } else {
        println!("   Permissions:");
        for capability in &manifest.permissions {
            println!("     - {} ({})", capability, capability.description());
        }
    }

    for command in &manifest.contributes.commands {
        println!("   Command: {} - {}", command.id, command.title);
    }
    for view in &manifest.contributes.views {
        println!("   View: {} in {} - {}", view.id, view.slot, view.title);
    }

    println!("   Integrity: {}", manifest.integrity);
    let verified = if package.verify_integrity().is_ok() { "yes" } else { "no" };
    println!("   Payload verified: {}", verified);

    let compatibility = versions.is_manifest_compatible(manifest);
    match compatibility.reason {
        Some(reason) => println!("   Compatible: no ({})", reason),
        None => println!("   Compatible: yes (host {})", versions.host_version()),
    }
    if package.readme.is_some() {
        println!("   README.md: included");
    }
    if package.changelog.is_some() {
        println!("   CHANGELOG.md: included");
    }
}
