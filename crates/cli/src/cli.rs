use std::path::PathBuf;

use warden_types::Capability;

#[derive(clap::Parser, Debug)]
#[clap(name = "warden", about = "Inspect extension bundles and manage host state")]
pub struct Cli {
    /// Path to config.json (defaults to the platform config directory)
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Show what would change without writing anything
    #[clap(long, global = true)]
    pub dry_run: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Read and verify extension bundles
    Package {
        #[clap(subcommand)]
        command: PackageCommands,
    },
    /// Manage installed extension versions
    Versions {
        #[clap(subcommand)]
        command: VersionCommands,
    },
    /// Manage capability grants
    Permissions {
        #[clap(subcommand)]
        command: PermissionCommands,
    },
    /// Manage host configuration
    Config {
        #[clap(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum PackageCommands {
    /// Show the manifest and payload digest of a bundle
    Inspect {
        bundle: PathBuf,
        /// Print the manifest as JSON
        #[clap(long)]
        json: bool,
    },
    /// Check the payload digest against the manifest
    Verify { bundle: PathBuf },
}

#[derive(clap::Subcommand, Debug)]
pub enum VersionCommands {
    /// List installed versions
    List,
    /// Check whether a bundle could be installed on this host
    Check { bundle: PathBuf },
    /// Record an older version as installed
    Rollback { id: String, version: String },
    /// Forget the installed version of an extension
    Remove { id: String },
}

#[derive(clap::Subcommand, Debug)]
pub enum PermissionCommands {
    /// List decisions, for one extension or all of them
    List { id: Option<String> },
    /// Grant a capability
    Grant { id: String, capability: Capability },
    /// Deny a capability
    Deny { id: String, capability: Capability },
    /// Remove a granted capability
    Revoke { id: String, capability: Capability },
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigCommands {
    /// Set a configuration value
    Set { key: String, value: String },
    /// Get a configuration value
    Get { key: String },
    /// Show all configuration values
    Show,
}
