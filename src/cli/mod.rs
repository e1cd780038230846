pub mod args;
pub mod commands;

pub use commands::{dispatch, Command};

use clap::Parser;

#[derive(Parser)]
#[command(name = "cardflow", version, about = "Workflow/ticketing engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}
