//! CLI command implementations

mod config;
mod list;
mod tunnel;

pub use config::{config_init, config_path, config_show};
pub use list::list_command;
pub use tunnel::{cleanup_command, tunnel_command};
