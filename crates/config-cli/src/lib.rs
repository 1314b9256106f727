//! Command-line interface for encrypted configuration files.

pub mod cli;
pub mod commands;
pub mod prompt;

pub use cli::{run_cli, ConfigCli};
