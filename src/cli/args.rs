use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct ValidateArgs {
    /// Directory containing workflow configuration YAML files
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,
}

#[derive(Args)]
pub struct ServeArgs {
    /// Directory containing workflow configuration YAML files
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Listener address for the RPC boundary
    #[arg(long, default_value = "127.0.0.1:7380", value_name = "ADDR")]
    pub bind: String,

    /// Token table mapping bearer tokens to identities
    /// (default: {DIR}/../.cardflow/config/tokens.toml)
    #[arg(long, value_name = "FILE")]
    pub tokens_file: Option<PathBuf>,

    /// Sender domain(s) served by the logging mail transport
    #[arg(long = "mail-domain", value_name = "DOMAIN")]
    pub mail_domains: Vec<String>,
}

impl ServeArgs {
    pub fn tokens_path(&self) -> PathBuf {
        self.tokens_file.clone().unwrap_or_else(|| {
            self.dir
                .join("..")
                .join(".cardflow")
                .join("config")
                .join("tokens.toml")
        })
    }
}
