use eyre::Result;
use warden_engine::HostConfig;
use warden_store::PermissionStore;

use crate::cli::PermissionCommands;
use crate::state::HostState;

pub async fn handle_permissions_command(
    cmd: PermissionCommands,
    config: &HostConfig,
    dry_run: bool,
) -> Result<()> {
    let state = HostState::open(config).await?;
    let permissions = &state.permissions;

    match cmd {
        PermissionCommands::List { id } => {
            let ids = match id {
                Some(id) => vec![id],
                None => permissions.extensions().await,
            };
            if ids.is_empty() {
                println!("🔒 No permission decisions recorded");
                return Ok(());
            }
            for id in ids {
                print_decisions(permissions, &id).await;
            }
            Ok(())
        }
        PermissionCommands::Grant { id, capability } => {
            if dry_run {
                println!("Would grant {} to {}", capability, id);
                return Ok(());
            }
            permissions.grant(&id, capability).await?;
            println!("✅ Granted {} to {}", capability, id);
            Ok(())
        }
        PermissionCommands::Deny { id, capability } => {
            if dry_run {
                println!("Would deny {} to {}", capability, id);
                return Ok(());
            }
            permissions.deny(&id, capability).await?;
            println!("✅ Denied {} to {}", capability, id);
            Ok(())
        }
        PermissionCommands::Revoke { id, capability } => {
            if dry_run {
                println!("Would revoke {} from {}", capability, id);
                return Ok(());
            }
            if permissions.revoke(&id, capability).await? {
                println!("✅ Revoked {} from {}", capability, id);
            } else {
                println!("⚠️ {} was not granted {}", id, capability);
            }
            Ok(())
        }
    }
}

async fn print_decisions(permissions: &PermissionStore, id: &str) {
    let granted = permissions.get_granted_permissions(id).await;
    let denied = permissions.get_denied_permissions(id).await;

    println!("🔒 {}", id);
    if granted.is_empty() && denied.is_empty() {
        println!("   (no decisions)");
        return;
    }
    for capability in granted {
        println!("   ✅ {}", capability);
    }
    for capability in denied {
        println!("   ❌ {}", capability);
    }
}
