use eyre::Result;
use warden_engine::HostConfig;
use warden_store::ExtensionPackage;

use crate::cli::VersionCommands;
use crate::state::HostState;

pub async fn handle_versions_command(
    cmd: VersionCommands,
    config: &HostConfig,
    dry_run: bool,
) -> Result<()> {
    let state = HostState::open(config).await?;

    match cmd {
        VersionCommands::List => {
            let installed = state.versions.installed_versions().await;
            if installed.is_empty() {
                println!("📦 No extensions installed");
                return Ok(());
            }

            println!(
                "📦 Installed extensions ({}), host {}:",
                installed.len(),
                state.versions.host_version()
            );
            for (id, version) in installed {
                println!("  {} v{}", id, version);
            }
            Ok(())
        }
        VersionCommands::Check { bundle } => {
            let package = ExtensionPackage::from_zip_file(&bundle).await?;
            let id = package.id();
            let version = package.version();

            let compatibility = state.versions.is_manifest_compatible(&package.manifest);
            let update = state.versions.can_update(id, version).await;
            let installed = state.versions.get_installed_version(id).await;

            println!(
                "🔍 {} v{} (installed: {})",
                id,
                version,
                installed.as_deref().unwrap_or("none")
            );
            match &compatibility.reason {
                Some(reason) => println!("   ❌ Incompatible: {}", reason),
                None => println!("   ✅ Compatible with host {}", state.versions.host_version()),
            }
            match &update.reason {
                Some(reason) => println!("   ❌ Cannot install: {}", reason),
                None => println!("   ✅ Can be installed"),
            }

            if compatibility.compatible && update.can_update {
                Ok(())
            } else {
                Err(eyre::eyre!("{} v{} cannot be installed", id, version))
            }
        }
        VersionCommands::Rollback { id, version } => {
            let Some(current) = state.versions.get_installed_version(&id).await else {
                return Err(eyre::eyre!("Extension '{}' is not installed", id));
            };
            if dry_run {
                println!("Would roll back {} from v{} to v{}", id, current, version);
                return Ok(());
            }

            state.versions.rollback(&id, &version).await?;
            println!("✅ Rolled back {} from v{} to v{}", id, current, version);
            Ok(())
        }
        VersionCommands::Remove { id } => {
            if dry_run {
                println!("Would remove installed version of {}", id);
                return Ok(());
            }

            if state.versions.remove_installed_version(&id).await? {
                println!("✅ Removed installed version of {}", id);
            } else {
                println!("⚠️ {} has no installed version", id);
            }
            Ok(())
        }
    }
}
