use crate::cli::args::{ServeArgs, ValidateArgs};
use crate::core::auth::StaticTokenAuth;
use crate::core::config::WorkflowRegistry;
use crate::core::mail::{LoggingMailer, MailerRegistry};
use crate::core::sheets::StaticRangeReader;
use crate::core::store::MemoryDocumentStore;
use crate::rpc;
use crate::Result;
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Subcommand)]
pub enum Command {
    /// Load workflow configurations and report validation problems
    Validate(ValidateArgs),
    /// Serve the RPC boundary over an in-memory document store
    Serve(ServeArgs),
}

impl Command {
    /// Workspace root used for logging configuration discovery.
    pub fn workspace_root(&self) -> Option<&Path> {
        match self {
            Command::Validate(args) => args.dir.parent(),
            Command::Serve(args) => args.dir.parent(),
        }
    }
}

pub async fn dispatch(command: Command) -> Result<()> {
    match command {
        Command::Validate(args) => validate(args).await,
        Command::Serve(args) => serve(args).await,
    }
}

async fn validate(args: ValidateArgs) -> Result<()> {
    let registry = WorkflowRegistry::load_dir(&args.dir)
        .with_context(|| format!("validation failed for {}", args.dir.display()))?;
    let mut ids = registry.workflow_ids();
    ids.sort();
    for id in &ids {
        info!(workflow = %id, "configuration valid");
    }
    println!("{} workflow configuration(s) valid", ids.len());
    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let registry = Arc::new(
        WorkflowRegistry::load_dir(&args.dir)
            .with_context(|| format!("failed to load configurations from {}", args.dir.display()))?,
    );

    let tokens_path = args.tokens_path();
    let auth = Arc::new(
        StaticTokenAuth::from_toml_file(&tokens_path)
            .with_context(|| format!("failed to load token table {}", tokens_path.display()))?,
    );

    let mut mailers = MailerRegistry::new();
    for domain in &args.mail_domains {
        mailers = mailers.register(domain.clone(), Arc::new(LoggingMailer::new()));
    }

    let state = rpc::build_state(
        registry,
        Arc::new(MemoryDocumentStore::new()),
        auth,
        Arc::new(mailers),
        Arc::new(StaticRangeReader::new()),
    );
    rpc::serve_rpc(state, &args.bind)
        .await
        .context("RPC server failed")?;
    Ok(())
}
