mod cli;
mod commands;
mod state;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use warden_engine::HostConfig;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(HostConfig::get_config_path);
    let config = HostConfig::load(&config_path).await?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Package { command } => {
            commands::handle_package_command(command, &config).await?;
        }
        Commands::Versions { command } => {
            commands::handle_versions_command(command, &config, cli.dry_run).await?;
        }
        Commands::Permissions { command } => {
            commands::handle_permissions_command(command, &config, cli.dry_run).await?;
        }
        Commands::Config { command } => {
            commands::handle_config_command(command, config, &config_path, cli.dry_run).await?;
        }
    }

    Ok(())
}
