use std::path::Path;

use eyre::Result;
use warden_engine::HostConfig;

use crate::cli::ConfigCommands;

const KEYS: [&str; 4] = ["host_version", "data_dir", "prompt_timeout_secs", "log_filter"];

pub async fn handle_config_command(
    cmd: ConfigCommands,
    mut config: HostConfig,
    path: &Path,
    dry_run: bool,
) -> Result<()> {
    match cmd {
        ConfigCommands::Set { key, value } => {
            if dry_run {
                println!("Would set config: {} = {}", key, value);
                return Ok(());
            }

            if let Err(e) = config.set_value(&key, &value) {
                println!("❌ Failed to set configuration: {}", e);
                return Err(e.into());
            }
            config.save(path).await?;
            println!("✅ Configuration updated: {} = {}", key, value);
            Ok(())
        }
        ConfigCommands::Get { key } => {
            let value = config.get_value(&key)?;
            println!("{}: {}", key, value);
            Ok(())
        }
        ConfigCommands::Show => {
            println!("Configuration ({}):", path.display());
            for key in KEYS {
                println!("├─ {}: {}", key, config.get_value(key)?);
            }
            Ok(())
        }
    }
}
