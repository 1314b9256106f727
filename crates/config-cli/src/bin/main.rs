//! Command-line interface for encrypted configuration files.
//!
//! # Exit codes
//!
//! - 0: success
//! - 2: tool error (provider/crypto/io failure)
//! - 99: input error (bad arguments, bad key path, missing file)

use clap::Parser;
use config_cli::cli::{run_cli, ConfigCli};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .init();

    let cli = ConfigCli::parse();
    let exit_code = run_cli(cli).await;
    std::process::exit(exit_code.into());
}
