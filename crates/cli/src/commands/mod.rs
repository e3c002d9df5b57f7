pub mod config;
pub mod package;
pub mod permissions;
pub mod versions;

pub use config::handle_config_command;
pub use package::handle_package_command;
pub use permissions::handle_permissions_command;
pub use versions::handle_versions_command;
