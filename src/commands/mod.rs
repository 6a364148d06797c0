mod changes;
mod config_cmd;
mod status;
mod sync_cmd;
mod tables;

pub use changes::ChangesCommand;
pub use config_cmd::ConfigCommand;
pub use status::StatusCommand;
pub use sync_cmd::SyncCommand;
pub use tables::TablesCommand;

use clap::ValueEnum;

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
