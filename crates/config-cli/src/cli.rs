//! CLI surface: argument parsing, dispatch, and exit codes.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use config_core::error::ConfigError;

use crate::commands;

/// Encrypted configuration file management.
#[derive(Parser, Debug)]
#[command(name = "config")]
#[command(about = "Manage encrypted YAML configuration files", long_about = None)]
#[command(version)]
pub struct ConfigCli {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Read a value (or the whole file) out of a config file.
    Get {
        /// Path to the config file.
        file: PathBuf,
        /// Dot-delimited key path; omit to print the whole decrypted file.
        key: Option<String>,
    },

    /// Write a value into a config file.
    Set {
        /// Path to the config file.
        file: PathBuf,
        /// Dot-delimited key path to write.
        key: String,
        /// Value to write; if omitted, prompted for interactively.
        value: Option<String>,
        /// Read the value from a file instead of the command line/prompt.
        #[arg(long)]
        input_file: Option<PathBuf>,
        /// Store the value unencrypted.
        #[arg(long)]
        plain_text: bool,
    },

    /// Create a brand-new, empty encrypted config file.
    Init {
        /// Path to create.
        file: PathBuf,
        /// Crypto provider to initialize with (kms, gpg, password).
        #[arg(long, default_value = "kms")]
        provider: String,
        /// Provider-specific key, e.g. a KMS ARN.
        #[arg(long)]
        key: Option<String>,
        /// gpg recipients, repeatable.
        #[arg(long)]
        recipient: Vec<String>,
        /// password provider password.
        #[arg(long)]
        password: Option<String>,
    },

    /// Re-encrypt every secret in a config file under a new provider.
    Rekey {
        /// Path to the config file.
        file: PathBuf,
        /// New crypto provider; defaults to the file's existing provider.
        #[arg(long)]
        provider: Option<String>,
        /// Provider-specific key, e.g. a KMS ARN.
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        recipient: Vec<String>,
        #[arg(long)]
        password: Option<String>,
    },
}

/// Matches the original tool's exit-code contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    ToolError = 2,
    InputError = 99,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<&ConfigError> for ExitCode {
    fn from(err: &ConfigError) -> Self {
        if err.is_user_error() {
            ExitCode::InputError
        } else {
            ExitCode::ToolError
        }
    }
}

pub async fn run_cli(cli: ConfigCli) -> ExitCode {
    let result = match cli.command {
        ConfigCommands::Get { file, key } => commands::get(&file, key.as_deref()).await,
        ConfigCommands::Set {
            file,
            key,
            value,
            input_file,
            plain_text,
        } => commands::set(&file, &key, value, input_file, plain_text).await,
        ConfigCommands::Init {
            file,
            provider,
            key,
            recipient,
            password,
        } => commands::init(&file, &provider, key, recipient, password).await,
        ConfigCommands::Rekey {
            file,
            provider,
            key,
            recipient,
            password,
        } => commands::rekey(&file, provider, key, recipient, password).await,
    };

    match result {
        Ok(()) => ExitCode::Success,
        Err(err) => {
            let code = ExitCode::from(&err);
            tracing::error!(%err, "command failed");
            eprintln!("error: {:#}", anyhow::Error::new(err));
            code
        }
    }
}
