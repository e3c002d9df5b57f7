//! Extension points extensions register into and the host queries.

pub mod commands;
pub mod ui;

pub use commands::{CommandHandler, CommandRegistry};
pub use ui::{UiChange, UiComponent, UiContribution, UiRegistry};
