use anyhow::Result;
use cardflow::cli::{self, Cli};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _logging_guard = cardflow::logging::init(cli.command.workspace_root())?;
    cli::dispatch(cli.command).await
}
