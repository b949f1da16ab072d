//! Command handlers, one module per command group.

pub mod cache;
pub mod config_cmd;
pub mod tree;
pub mod util;

use gridstudy_core::SessionConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a command that talks to the study service.
pub async fn dispatch(
    cmd: Command,
    config: SessionConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Tree => tree::tree(config, global).await,
        Command::Aliases => tree::aliases(config, global).await,
        Command::BuiltNodes(args) => tree::built_nodes(config, &args, global).await,
        Command::Snapshot(args) => cache::snapshot(config, &args, global).await,
        Command::Equipments(args) => cache::equipments(config, &args, global).await,
        Command::Watch(args) => cache::watch(config, &args, global).await,
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
