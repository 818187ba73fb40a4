pub mod classify;
pub mod config_cmd;
pub mod simulate;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

pub async fn dispatch(cmd: &Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Simulate(args) => simulate::handle(args, global).await,
        Command::Classify(args) => classify::handle(args),
        Command::Config(cmd) => config_cmd::handle(cmd, global),
    }
}
